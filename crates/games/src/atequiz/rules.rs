//! Per-game hooks the engine calls while a round runs.

use std::time::Duration;

use async_trait::async_trait;
use quizbot_core::config::QuizConfig;
use quizbot_core::text::answers_match;
use quizbot_slack::{MessageEvent, MessagePayload};

use crate::atequiz::problem::{fill_winner, QuizProblem};
use crate::error::QuizError;

pub const DEFAULT_NG_REACTION: &str = "no_good";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Correct,
    /// Not correct; `reply` is posted in the thread to explain why.
    Incorrect { reply: Option<MessagePayload> },
}

impl Verdict {
    pub fn incorrect() -> Self {
        Self::Incorrect { reply: None }
    }
}

/// Hint pacing: a fixed wait per hint and a longer one before the round times out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HintTiming {
    pub hint_interval: Duration,
    pub final_interval: Duration,
}

impl Default for HintTiming {
    fn default() -> Self {
        Self { hint_interval: Duration::from_secs(15), final_interval: Duration::from_secs(30) }
    }
}

impl HintTiming {
    pub fn from_config(config: &QuizConfig) -> Self {
        Self {
            hint_interval: Duration::from_secs(config.hint_interval_secs),
            final_interval: Duration::from_secs(config.final_interval_secs),
        }
    }

    pub fn wait(&self, hint_index: usize, hint_count: usize) -> Duration {
        if hint_index == hint_count {
            self.final_interval
        } else {
            self.hint_interval
        }
    }
}

#[async_trait]
pub trait QuizRules: Send + Sync {
    /// Wait after the previous hint before revealing `hint_index`, or before timing out once
    /// `hint_index == hint_count`. `None` never times out.
    fn wait(&self, hint_index: usize, hint_count: usize) -> Option<Duration>;

    fn judge(&self, problem: &QuizProblem, answer: &str, _user: &str) -> Verdict {
        if problem.correct_answers.iter().any(|expected| answers_match(answer, expected)) {
            Verdict::Correct
        } else {
            Verdict::incorrect()
        }
    }

    async fn solved_message(
        &self,
        problem: &QuizProblem,
        _winner: &MessageEvent,
        _elapsed: Duration,
    ) -> Result<MessagePayload, QuizError> {
        Ok(problem.solved_message.clone())
    }

    /// Posted after the solved or unsolved message; `winner` is `None` on timeout.
    async fn answer_message(
        &self,
        problem: &QuizProblem,
        _winner: Option<&MessageEvent>,
        _elapsed: Duration,
    ) -> Result<Option<MessagePayload>, QuizError> {
        Ok(problem.answer_message.clone())
    }

    fn incorrect_message(
        &self,
        problem: &QuizProblem,
        message: &MessageEvent,
    ) -> Option<MessagePayload> {
        problem.incorrect_message.clone().map(|reply| fill_winner(reply, message.user()))
    }

    fn ng_reaction(&self) -> Option<&str> {
        Some(DEFAULT_NG_REACTION)
    }
}

/// Default judging with the standard hint pacing.
#[derive(Clone, Debug, Default)]
pub struct StandardRules {
    pub timing: HintTiming,
}

impl StandardRules {
    pub fn new(timing: HintTiming) -> Self {
        Self { timing }
    }
}

#[async_trait]
impl QuizRules for StandardRules {
    fn wait(&self, hint_index: usize, hint_count: usize) -> Option<Duration> {
        Some(self.timing.wait(hint_index, hint_count))
    }
}
