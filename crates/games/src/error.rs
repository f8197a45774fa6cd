use quizbot_core::{ApplicationError, DomainError, LedgerError, StateError};
use quizbot_slack::WebApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuizError {
    #[error(transparent)]
    Transport(#[from] WebApiError),
    #[error("content unavailable: {0}")]
    Content(String),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("round aborted: {0}")]
    Aborted(String),
    #[error("invalid wake word pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl QuizError {
    pub fn content(detail: impl std::fmt::Display) -> Self {
        Self::Content(detail.to_string())
    }
}

impl From<QuizError> for ApplicationError {
    fn from(value: QuizError) -> Self {
        match value {
            QuizError::Transport(error) => Self::Integration(error.to_string()),
            QuizError::Content(detail) => Self::Content(detail),
            QuizError::State(error) => Self::Persistence(error.to_string()),
            QuizError::Ledger(error) => Self::Persistence(error.to_string()),
            QuizError::Domain(error) => Self::Domain(error),
            QuizError::Aborted(detail) => {
                Self::Domain(DomainError::InvariantViolation(format!("round aborted: {detail}")))
            }
            QuizError::Pattern(error) => Self::Configuration(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use quizbot_core::{ApplicationError, InterfaceError};
    use quizbot_slack::WebApiError;

    use super::QuizError;

    #[test]
    fn transport_failures_surface_as_service_unavailable() {
        let error = QuizError::from(WebApiError::Api {
            method: "chat.postMessage".to_string(),
            error: "channel_not_found".to_string(),
        });
        let interface = ApplicationError::from(error).into_interface("round-1");
        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert!(interface.message().contains("channel_not_found"));
    }
}
