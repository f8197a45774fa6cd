//! Per-round state machine shared by every timed quiz.
//!
//! A round moves `Pending -> Running -> {Solved | Unsolved | Aborted}`. Terminal
//! states never transition again, the hint index only grows, and the winner is
//! recorded exactly once on the move into `Solved`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Pending,
    Running,
    Solved,
    Unsolved,
    Aborted,
}

impl RoundState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Solved | Self::Unsolved | Self::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Solved => "solved",
            Self::Unsolved => "unsolved",
            Self::Aborted => "aborted",
        }
    }
}

/// Channel plus message timestamp that anchors a round's follow-up posts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRef {
    pub channel: String,
    pub ts: String,
}

#[derive(Clone, Debug)]
pub struct QuizRound {
    state: RoundState,
    hint_index: usize,
    hint_count: usize,
    started_at: Option<Instant>,
    last_hint_at: Option<Instant>,
    finished_at: Option<Instant>,
    correct_answerer: Option<String>,
    thread: Option<ThreadRef>,
}

impl QuizRound {
    pub fn new(hint_count: usize) -> Self {
        Self {
            state: RoundState::Pending,
            hint_index: 0,
            hint_count,
            started_at: None,
            last_hint_at: None,
            finished_at: None,
            correct_answerer: None,
            thread: None,
        }
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn hint_index(&self) -> usize {
        self.hint_index
    }

    pub fn hint_count(&self) -> usize {
        self.hint_count
    }

    pub fn hints_remaining(&self) -> bool {
        self.hint_index < self.hint_count
    }

    pub fn correct_answerer(&self) -> Option<&str> {
        self.correct_answerer.as_deref()
    }

    pub fn thread(&self) -> Option<&ThreadRef> {
        self.thread.as_ref()
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Deadline for the next hint (or the timeout once hints are exhausted).
    pub fn next_deadline(&self, wait: Duration) -> Option<Instant> {
        self.last_hint_at.map(|last| last + wait)
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        let end = self.finished_at.unwrap_or(now);
        self.started_at.map(|start| end.saturating_duration_since(start)).unwrap_or_default()
    }

    pub fn start(&mut self, thread: ThreadRef, now: Instant) -> Result<(), DomainError> {
        self.transition(RoundState::Running)?;
        self.started_at = Some(now);
        self.last_hint_at = Some(now);
        self.thread = Some(thread);
        Ok(())
    }

    /// Advances to the next hint and returns the index of the hint to reveal.
    pub fn reveal_hint(&mut self, now: Instant) -> Result<usize, DomainError> {
        if self.state != RoundState::Running {
            return Err(DomainError::InvariantViolation(format!(
                "hint revealed while round is {}",
                self.state.as_str()
            )));
        }
        if !self.hints_remaining() {
            return Err(DomainError::InvariantViolation(format!(
                "hint index {} exceeds hint count {}",
                self.hint_index, self.hint_count
            )));
        }
        let revealed = self.hint_index;
        self.hint_index += 1;
        self.last_hint_at = Some(now);
        Ok(revealed)
    }

    pub fn solve(&mut self, user: impl Into<String>, now: Instant) -> Result<(), DomainError> {
        self.transition(RoundState::Solved)?;
        self.correct_answerer = Some(user.into());
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn expire(&mut self, now: Instant) -> Result<(), DomainError> {
        self.transition(RoundState::Unsolved)?;
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn abort(&mut self, now: Instant) -> Result<(), DomainError> {
        self.transition(RoundState::Aborted)?;
        self.finished_at = Some(now);
        Ok(())
    }

    fn transition(&mut self, to: RoundState) -> Result<(), DomainError> {
        use RoundState::*;

        let allowed = matches!(
            (self.state, to),
            (Pending, Running) | (Pending, Aborted) | (Running, Solved | Unsolved | Aborted)
        );
        if !allowed {
            return Err(DomainError::InvalidRoundTransition { from: self.state, to });
        }
        self.state = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::{QuizRound, RoundState, ThreadRef};
    use crate::errors::DomainError;

    fn thread() -> ThreadRef {
        ThreadRef { channel: "CSANDBOX".to_string(), ts: "1700000000.000100".to_string() }
    }

    #[test]
    fn hints_advance_monotonically_until_exhausted() {
        let now = Instant::now();
        let mut round = QuizRound::new(2);
        round.start(thread(), now).expect("start");

        assert_eq!(round.reveal_hint(now).expect("first hint"), 0);
        assert_eq!(round.reveal_hint(now).expect("second hint"), 1);
        assert_eq!(round.hint_index(), 2);
        assert!(!round.hints_remaining());
        assert!(matches!(round.reveal_hint(now), Err(DomainError::InvariantViolation(_))));
        assert_eq!(round.hint_index(), 2);
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let now = Instant::now();
        let mut round = QuizRound::new(0);
        round.start(thread(), now).expect("start");
        round.solve("U1", now + Duration::from_secs(3)).expect("solve");

        assert_eq!(
            round.solve("U2", now),
            Err(DomainError::InvalidRoundTransition {
                from: RoundState::Solved,
                to: RoundState::Solved
            })
        );
        assert!(round.expire(now).is_err());
        assert_eq!(round.correct_answerer(), Some("U1"));
        assert_eq!(round.elapsed(now + Duration::from_secs(60)), Duration::from_secs(3));
    }

    #[test]
    fn pending_round_cannot_be_solved() {
        let mut round = QuizRound::new(1);
        assert!(round.solve("U1", Instant::now()).is_err());
        assert_eq!(round.state(), RoundState::Pending);
        assert!(round.abort(Instant::now()).is_ok());
        assert!(round.state().is_terminal());
    }

    #[test]
    fn deadline_tracks_last_hint() {
        let now = Instant::now();
        let mut round = QuizRound::new(1);
        assert_eq!(round.next_deadline(Duration::from_secs(15)), None);
        round.start(thread(), now).expect("start");
        let first = round.next_deadline(Duration::from_secs(15));
        assert_eq!(first, Some(now + Duration::from_secs(15)));

        let later = now + Duration::from_secs(15);
        round.reveal_hint(later).expect("hint");
        let second = round.next_deadline(Duration::from_secs(30));
        assert_eq!(second, Some(later + Duration::from_secs(30)));
    }
}
