use std::sync::Arc;
use std::time::Duration;

use quizbot_core::config::QuizConfig;
use quizbot_core::AchievementLedger;
use quizbot_slack::{MessageBus, MessageEvent, SlackWebApi};
use tracing::warn;

use crate::atequiz::HintTiming;
use crate::error::QuizError;
use crate::ricochet::battle::BattleTiming;

const BUSY_TEXT: &str = "今クイズ中だよ";

/// Quiz pacing and history sizes shared by the adapters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QuizSettings {
    pub tick: Duration,
    pub timing: HintTiming,
    pub recent_history_limit: usize,
    pub battle: BattleTiming,
}

impl Default for QuizSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            timing: HintTiming::default(),
            recent_history_limit: 200,
            battle: BattleTiming::default(),
        }
    }
}

impl QuizSettings {
    pub fn from_config(config: &QuizConfig) -> Self {
        Self {
            tick: Duration::from_millis(config.tick_interval_ms),
            timing: HintTiming::from_config(config),
            recent_history_limit: config.recent_history_limit,
            battle: BattleTiming::from_config(config),
        }
    }
}

/// Collaborators every adapter needs.
#[derive(Clone)]
pub struct GameContext {
    pub web: Arc<dyn SlackWebApi>,
    pub bus: MessageBus,
    pub ledger: Arc<dyn AchievementLedger>,
    pub settings: QuizSettings,
}

impl GameContext {
    pub fn new(
        web: Arc<dyn SlackWebApi>,
        bus: MessageBus,
        ledger: Arc<dyn AchievementLedger>,
    ) -> Self {
        Self { web, bus, ledger, settings: QuizSettings::default() }
    }

    pub fn with_settings(mut self, settings: QuizSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Increments each counter once for `user`.
    pub async fn increment_all(&self, user: &str, counters: &[String]) -> Result<(), QuizError> {
        for counter in counters {
            self.ledger.increment(user, counter, 1).await?;
        }
        Ok(())
    }

    /// Tells the requester that a round is already running.
    pub async fn notify_busy(&self, message: &MessageEvent) {
        let posted = self.web.post_ephemeral(&message.channel_id, message.user(), BUSY_TEXT).await;
        if let Err(error) = posted {
            warn!(
                event_name = "quiz.busy_notice_failed",
                channel_id = %message.channel_id,
                error = %error,
                "could not post busy notice"
            );
        }
    }
}
