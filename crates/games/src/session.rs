//! Outer handler around a spawned round.
//!
//! Whatever the task does, the ticket's deferreds settle: `started` resolves when the
//! problem is posted (or is rejected if the round never got that far) and `finished`
//! resolves once the task is over. Failures are posted back to the channel.

use std::future::Future;
use std::sync::Arc;

use quizbot_core::{ApplicationError, Deferred};
use quizbot_slack::blocks::error_message;
use quizbot_slack::{PostedMessage, SlackWebApi, WakeResponse};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::QuizError;

#[derive(Clone, Debug, Default)]
pub struct RoundTicket {
    pub started: Deferred<PostedMessage>,
    pub finished: Deferred<()>,
}

impl RoundTicket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the problem to be posted; `None` when the round failed before that.
    pub async fn wake_response(&self) -> Option<WakeResponse> {
        let message = self.started.wait().await.ok()?;
        Some(WakeResponse { message, finished: Some(self.finished.clone()) })
    }
}

/// Spawns `task` for `game` in `channel`, wiring its settlement into the returned ticket.
///
/// The task receives the ticket's `started` deferred to resolve when its problem is posted.
pub fn launch<F, Fut>(
    web: Arc<dyn SlackWebApi>,
    game: &'static str,
    channel: impl Into<String>,
    task: F,
) -> (RoundTicket, JoinHandle<()>)
where
    F: FnOnce(Deferred<PostedMessage>) -> Fut,
    Fut: Future<Output = Result<(), QuizError>> + Send + 'static,
{
    let ticket = RoundTicket::new();
    let channel = channel.into();
    let correlation_id = Uuid::new_v4().to_string();
    let future = task(ticket.started.clone());
    let settle = ticket.clone();

    let join = tokio::spawn(async move {
        match future.await {
            Ok(()) => {
                info!(
                    event_name = "quiz.round.finished",
                    game,
                    correlation_id = %correlation_id,
                    "round finished"
                );
            }
            Err(failure) => {
                error!(
                    event_name = "quiz.round.failed",
                    game,
                    channel_id = %channel,
                    correlation_id = %correlation_id,
                    error = %failure,
                    "round failed"
                );
                let detail = failure.to_string();
                let interface =
                    ApplicationError::from(failure).into_interface(correlation_id.clone());
                let summary = interface.user_message();
                let report = error_message(&channel, summary, &detail, &correlation_id);
                if let Err(post_error) = web.post_message(&report).await {
                    warn!(
                        event_name = "quiz.round.error_report_failed",
                        game,
                        correlation_id = %correlation_id,
                        error = %post_error,
                        "could not report round failure"
                    );
                }
            }
        }
        settle.started.reject(format!("{game} round ended before its problem was posted"));
        settle.finished.resolve(());
    });

    (ticket, join)
}
