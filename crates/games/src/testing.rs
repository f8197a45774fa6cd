use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quizbot_core::{AchievementLedger, LedgerError};
use quizbot_slack::testing::RecordingWebApi;
use quizbot_slack::{MessageBus, MessageEvent};
use tokio::sync::Mutex;

use crate::context::GameContext;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum LedgerCall {
    Unlock { user: String, id: String },
    Increment { user: String, counter: String, amount: u64 },
}

#[derive(Default)]
pub(crate) struct RecordingLedger {
    calls: Mutex<Vec<LedgerCall>>,
    counters: Mutex<BTreeMap<(String, String), u64>>,
}

impl RecordingLedger {
    pub(crate) async fn calls(&self) -> Vec<LedgerCall> {
        self.calls.lock().await.clone()
    }

    pub(crate) async fn increments(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                LedgerCall::Increment { user, counter, .. } => {
                    Some((user.clone(), counter.clone()))
                }
                LedgerCall::Unlock { .. } => None,
            })
            .collect()
    }

    pub(crate) async fn unlocks(&self) -> Vec<(String, String)> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                LedgerCall::Unlock { user, id } => Some((user.clone(), id.clone())),
                LedgerCall::Increment { .. } => None,
            })
            .collect()
    }

    pub(crate) async fn counted(&self, user: &str, counter: &str) -> bool {
        self.increments().await.iter().any(|(who, name)| who == user && name == counter)
    }
}

#[async_trait]
impl AchievementLedger for RecordingLedger {
    async fn unlock(&self, user: &str, achievement_id: &str) -> Result<bool, LedgerError> {
        let mut calls = self.calls.lock().await;
        let call = LedgerCall::Unlock { user: user.to_string(), id: achievement_id.to_string() };
        let fresh = !calls.contains(&call);
        calls.push(call);
        Ok(fresh)
    }

    async fn increment(&self, user: &str, counter: &str, amount: u64) -> Result<u64, LedgerError> {
        self.calls.lock().await.push(LedgerCall::Increment {
            user: user.to_string(),
            counter: counter.to_string(),
            amount,
        });
        let mut counters = self.counters.lock().await;
        let value = counters.entry((user.to_string(), counter.to_string())).or_default();
        *value += amount;
        Ok(*value)
    }
}

pub(crate) struct Harness {
    pub web: Arc<RecordingWebApi>,
    pub ledger: Arc<RecordingLedger>,
    pub ctx: GameContext,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let web = Arc::new(RecordingWebApi::new());
        let ledger = Arc::new(RecordingLedger::default());
        let ctx = GameContext::new(web.clone(), MessageBus::new(), ledger.clone());
        Self { web, ledger, ctx }
    }

    pub(crate) fn publish(&self, message: MessageEvent) {
        self.ctx.bus.publish(message);
    }

    /// Yields until the engine task has picked up published messages.
    pub(crate) async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub(crate) fn wake(channel: &str, user: &str, text: &str) -> MessageEvent {
    MessageEvent {
        channel_id: channel.to_string(),
        ts: "1600000000.000001".to_string(),
        thread_ts: None,
        user_id: Some(user.to_string()),
        text: Some(text.to_string()),
        subtype: None,
        bot_id: None,
    }
}

pub(crate) fn answer(channel: &str, thread_ts: &str, user: &str, text: &str) -> MessageEvent {
    MessageEvent {
        channel_id: channel.to_string(),
        ts: "1800000000.000001".to_string(),
        thread_ts: Some(thread_ts.to_string()),
        user_id: Some(user.to_string()),
        text: Some(text.to_string()),
        subtype: None,
        bot_id: None,
    }
}
