//! Per-user achievements and counters.
//!
//! Unlocking is idempotent. Counters are cumulative and unlock any catalog
//! entry whose `counter`/`value` threshold they reach. Users that are not
//! real members (ids not starting with `U`, or `USLACKBOT`) are ignored.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::state::{PluginState, StateError, StateStore};

const BUILTIN_CATALOG: &str = include_str!("../data/achievements.json");
const LEDGER_STATE_KEY: &str = "achievements";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Baby,
    Easy,
    Medium,
    Hard,
    Professional,
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baby => "baby",
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
            Self::Professional => "professional",
        }
    }

    pub fn stars(self) -> &'static str {
        match self {
            Self::Baby => "★☆☆☆☆",
            Self::Easy => "★★☆☆☆",
            Self::Medium => "★★★☆☆",
            Self::Hard => "★★★★☆",
            Self::Professional => "★★★★★",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub difficulty: Difficulty,
    pub title: String,
    pub condition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<u64>,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unknown achievement `{0}`")]
    UnknownAchievement(String),
    #[error("achievement catalog is invalid: {0}")]
    Catalog(String),
    #[error(transparent)]
    State(#[from] StateError),
}

#[derive(Clone, Debug, Default)]
pub struct AchievementCatalog {
    ordered: Vec<Achievement>,
    by_id: HashMap<String, usize>,
}

impl AchievementCatalog {
    pub fn builtin() -> Result<Self, LedgerError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn from_json(raw: &str) -> Result<Self, LedgerError> {
        let entries: Vec<Achievement> =
            serde_json::from_str(raw).map_err(|error| LedgerError::Catalog(error.to_string()))?;
        Self::from_entries(entries)
    }

    pub fn from_entries(entries: Vec<Achievement>) -> Result<Self, LedgerError> {
        let mut by_id = HashMap::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            if by_id.insert(entry.id.clone(), index).is_some() {
                return Err(LedgerError::Catalog(format!(
                    "duplicate achievement id `{}`",
                    entry.id
                )));
            }
            if entry.counter.is_some() != entry.value.is_some() {
                return Err(LedgerError::Catalog(format!(
                    "achievement `{}` must set both counter and value",
                    entry.id
                )));
            }
        }
        Ok(Self { ordered: entries, by_id })
    }

    pub fn get(&self, id: &str) -> Option<&Achievement> {
        self.by_id.get(id).map(|index| &self.ordered[*index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Achievement> {
        self.ordered.iter()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Unlock announcement, fanned out to whoever posts congratulations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unlocked {
    pub user: String,
    pub achievement: Achievement,
    pub first_in_workspace: bool,
}

#[async_trait]
pub trait AchievementLedger: Send + Sync {
    /// Returns `true` when the achievement was newly unlocked.
    async fn unlock(&self, user: &str, achievement_id: &str) -> Result<bool, LedgerError>;

    /// Returns the counter's new value (0 for users that are not tracked).
    async fn increment(&self, user: &str, counter: &str, amount: u64) -> Result<u64, LedgerError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockRecord {
    pub id: String,
    pub date: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    pub achievements: BTreeMap<String, Vec<UnlockRecord>>,
    pub counters: BTreeMap<String, BTreeMap<String, u64>>,
}

pub fn is_tracked_user(user: &str) -> bool {
    user.starts_with('U') && user != "USLACKBOT"
}

pub struct StateAchievementLedger {
    catalog: Arc<AchievementCatalog>,
    state: PluginState<LedgerState>,
    announcements: broadcast::Sender<Unlocked>,
}

impl StateAchievementLedger {
    pub async fn load(
        store: Arc<dyn StateStore>,
        catalog: Arc<AchievementCatalog>,
    ) -> Result<Self, LedgerError> {
        let state = PluginState::load(store, LEDGER_STATE_KEY).await?;
        let (announcements, _) = broadcast::channel(64);
        Ok(Self { catalog, state, announcements })
    }

    pub fn catalog(&self) -> &AchievementCatalog {
        &self.catalog
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Unlocked> {
        self.announcements.subscribe()
    }

    pub async fn holdings(&self, user: &str) -> Vec<String> {
        self.state
            .read(|state| {
                state
                    .achievements
                    .get(user)
                    .map(|records| records.iter().map(|record| record.id.clone()).collect())
                    .unwrap_or_default()
            })
            .await
    }

    pub async fn counter(&self, user: &str, counter: &str) -> u64 {
        self.state
            .read(|state| {
                state.counters.get(counter).and_then(|users| users.get(user)).copied().unwrap_or(0)
            })
            .await
    }

    async fn unlock_one(&self, user: &str, id: &str) -> Result<Option<Unlocked>, LedgerError> {
        let achievement = self
            .catalog
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownAchievement(id.to_string()))?;

        let first_in_workspace = self
            .state
            .mutate(|state| {
                let held = state.achievements.get(user).is_some_and(|records| {
                    records.iter().any(|record| record.id == achievement.id)
                });
                if held {
                    return None;
                }
                let first = state
                    .achievements
                    .values()
                    .all(|records| records.iter().all(|record| record.id != achievement.id));
                state
                    .achievements
                    .entry(user.to_string())
                    .or_default()
                    .push(UnlockRecord { id: achievement.id.clone(), date: Utc::now() });
                Some(first)
            })
            .await?;

        Ok(first_in_workspace.map(|first_in_workspace| Unlocked {
            user: user.to_string(),
            achievement,
            first_in_workspace,
        }))
    }

    /// Meta achievements earned by the size of a user's collection.
    async fn collection_milestones(&self, user: &str) -> Vec<&'static str> {
        let holdings = self.holdings(user).await;
        let difficulties: Vec<Difficulty> = holdings
            .iter()
            .filter_map(|id| self.catalog.get(id).map(|entry| entry.difficulty))
            .collect();
        let above_baby = difficulties.iter().filter(|d| **d > Difficulty::Baby).count();
        let above_easy = difficulties.iter().filter(|d| **d > Difficulty::Easy).count();

        let mut milestones = Vec::new();
        if !holdings.is_empty() {
            milestones.push("achievements");
        }
        if above_baby >= 3 {
            milestones.push("achievements-3");
        }
        if above_baby >= 10 {
            milestones.push("achievements-10");
        }
        if above_easy >= 10 {
            milestones.push("achievements-master");
        }
        milestones.retain(|id| self.catalog.get(id).is_some());
        milestones
    }
}

#[async_trait]
impl AchievementLedger for StateAchievementLedger {
    async fn unlock(&self, user: &str, achievement_id: &str) -> Result<bool, LedgerError> {
        if self.catalog.get(achievement_id).is_none() {
            return Err(LedgerError::UnknownAchievement(achievement_id.to_string()));
        }
        if !is_tracked_user(user) {
            return Ok(false);
        }

        let mut pending = vec![achievement_id.to_string()];
        let mut requested_unlocked = false;
        while let Some(id) = pending.pop() {
            let Some(unlocked) = self.unlock_one(user, &id).await? else {
                continue;
            };
            if id == achievement_id {
                requested_unlocked = true;
            }
            debug!(
                event_name = "achievements.unlocked",
                user_id = user,
                achievement_id = %id,
                first_in_workspace = unlocked.first_in_workspace,
                "achievement unlocked"
            );
            // nobody listening is fine
            let _ = self.announcements.send(unlocked);
            for milestone in self.collection_milestones(user).await {
                pending.push(milestone.to_string());
            }
        }
        Ok(requested_unlocked)
    }

    async fn increment(&self, user: &str, counter: &str, amount: u64) -> Result<u64, LedgerError> {
        if !is_tracked_user(user) {
            return Ok(0);
        }

        let (before, after) = self
            .state
            .mutate(|state| {
                let slot = state
                    .counters
                    .entry(counter.to_string())
                    .or_default()
                    .entry(user.to_string())
                    .or_insert(0);
                let before = *slot;
                *slot = slot.saturating_add(amount);
                (before, *slot)
            })
            .await?;

        let reached: Vec<String> = self
            .catalog
            .iter()
            .filter(|entry| entry.counter.as_deref() == Some(counter))
            .filter(|entry| entry.value.is_some_and(|value| value > before && value <= after))
            .map(|entry| entry.id.clone())
            .collect();
        for id in reached {
            self.unlock(user, &id).await?;
        }
        Ok(after)
    }
}
