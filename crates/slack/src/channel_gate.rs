//! Restricts wake-word games to a set of channels.
//!
//! A wake word typed anywhere else still runs, but in the first allowed
//! channel; the triggering message is removed and its author gets an
//! ephemeral pointer to where the game went.

use std::sync::Arc;

use async_trait::async_trait;
use quizbot_core::Deferred;
use regex::Regex;
use thiserror::Error;
use tracing::{info, warn};

use crate::blocks::MessagePayload;
use crate::events::{
    EventContext, EventHandler, EventHandlerError, HandlerResult, MessageEvent, SlackEnvelope,
    SlackEvent, SlackEventType,
};
use crate::web::{PostedMessage, SlackWebApi, WebApiError};

const NOT_ALLOWED_TEXT: &str = "このチャンネルでは実行できません";

/// What a wake-word handler produced in the channel it was sent to.
#[derive(Clone, Debug)]
pub struct WakeResponse {
    /// The public message the game posted, linked from pointers and progress notes.
    pub message: PostedMessage,
    /// Settles when the game is over, if the game keeps running after the reply.
    pub finished: Option<Deferred<()>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WakeError {
    #[error("wake word handler failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait WakeWordHandler: Send + Sync {
    fn name(&self) -> &str;

    fn wake_word(&self) -> &Regex;

    /// Runs the game in `channel`, which may differ from where the message was typed.
    async fn on_wake_word(
        &self,
        message: &MessageEvent,
        channel: &str,
    ) -> Result<Option<WakeResponse>, WakeError>;
}

struct GateInner<H> {
    handler: H,
    web: Arc<dyn SlackWebApi>,
    allowed_channels: Vec<String>,
    progress_channel: String,
}

/// Wraps a [`WakeWordHandler`] with channel restrictions.
pub struct ChannelLimitedBot<H> {
    inner: Arc<GateInner<H>>,
}

impl<H> ChannelLimitedBot<H>
where
    H: WakeWordHandler + 'static,
{
    /// `allowed_channels[0]` is where disallowed wake words are redirected.
    pub fn new(
        handler: H,
        web: Arc<dyn SlackWebApi>,
        allowed_channels: Vec<String>,
        progress_channel: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(GateInner {
                handler,
                web,
                allowed_channels,
                progress_channel: progress_channel.into(),
            }),
        }
    }

    /// Runs the gate for one matching message to completion.
    pub async fn run(&self, message: MessageEvent) {
        self.inner.run(message).await;
    }
}

impl<H> GateInner<H>
where
    H: WakeWordHandler,
{
    fn is_allowed(&self, channel: &str) -> bool {
        self.allowed_channels.iter().any(|allowed| allowed == channel)
    }

    async fn run(&self, message: MessageEvent) {
        let origin = message.channel_id.clone();
        let allowed = self.is_allowed(&origin);
        let Some(target) =
            (if allowed { Some(origin.clone()) } else { self.allowed_channels.first().cloned() })
        else {
            warn!(
                event_name = "slack.channel_gate.no_allowed_channel",
                game = self.handler.name(),
                "wake word matched but no channel is allowed"
            );
            return;
        };

        if !allowed {
            info!(
                event_name = "slack.channel_gate.redirected",
                game = self.handler.name(),
                channel_id = %origin,
                target_channel = %target,
                "wake word redirected to an allowed channel"
            );
        }

        let response = match self.handler.on_wake_word(&message, &target).await {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    event_name = "slack.channel_gate.handler_failed",
                    game = self.handler.name(),
                    channel_id = %target,
                    error = %error,
                    "wake word handler failed"
                );
                None
            }
        };

        if !allowed {
            self.notify_origin(&message, response.as_ref()).await;
            self.delete_trigger(&message).await;
        }

        if let Some(response) = response {
            self.track_progress(response).await;
        }
    }

    async fn notify_origin(&self, message: &MessageEvent, response: Option<&WakeResponse>) {
        let text = match response {
            Some(response) => {
                match self.web.permalink(&response.message.channel, &response.message.ts).await {
                    Ok(link) => format!("<{link}|ここ>で実行しました"),
                    Err(error) => {
                        log_web_failure(self.handler.name(), "permalink", &error);
                        format!("<#{}>で実行しました", response.message.channel)
                    }
                }
            }
            None => NOT_ALLOWED_TEXT.to_string(),
        };

        let posted = self.web.post_ephemeral(&message.channel_id, message.user(), &text).await;
        if let Err(error) = posted {
            log_web_failure(self.handler.name(), "post_ephemeral", &error);
        }
    }

    async fn delete_trigger(&self, message: &MessageEvent) {
        match self.web.delete_message(&message.channel_id, &message.ts, true).await {
            Ok(()) => {}
            Err(WebApiError::MissingAdminToken(_)) => warn!(
                event_name = "slack.channel_gate.delete_skipped",
                game = self.handler.name(),
                channel_id = %message.channel_id,
                "no admin token configured; triggering message left in place"
            ),
            Err(error) => log_web_failure(self.handler.name(), "delete_message", &error),
        }
    }

    /// Posts a progress link in the progress channel until the game finishes.
    async fn track_progress(&self, response: WakeResponse) {
        let Some(finished) = response.finished else {
            return;
        };
        if response.message.channel == self.progress_channel {
            return;
        }

        let link = match self.web.permalink(&response.message.channel, &response.message.ts).await {
            Ok(link) => link,
            Err(error) => {
                log_web_failure(self.handler.name(), "permalink", &error);
                return;
            }
        };
        let note = MessagePayload::text(&self.progress_channel, format!("<{link}|進行中のゲーム>"));
        let posted = match self.web.post_message(&note).await {
            Ok(posted) => posted,
            Err(error) => {
                log_web_failure(self.handler.name(), "post_message", &error);
                return;
            }
        };

        // a rejected round is finished too
        let _ = finished.wait().await;
        if let Err(error) = self.web.delete_message(&posted.channel, &posted.ts, false).await {
            log_web_failure(self.handler.name(), "delete_message", &error);
        }
    }
}

fn log_web_failure(game: &str, operation: &str, error: &WebApiError) {
    warn!(
        event_name = "slack.channel_gate.web_failed",
        game,
        operation,
        error = %error,
        "slack web api call failed"
    );
}

#[async_trait]
impl<H> EventHandler for ChannelLimitedBot<H>
where
    H: WakeWordHandler + 'static,
{
    fn event_type(&self) -> SlackEventType {
        SlackEventType::Message
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::Message(message) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };
        let woken = self.inner.handler.wake_word().is_match(message.text());
        if !message.is_plain_user_message() || !woken {
            return Ok(HandlerResult::Ignored);
        }

        info!(
            event_name = "slack.channel_gate.wake_word",
            correlation_id = %ctx.correlation_id,
            game = self.inner.handler.name(),
            channel_id = %message.channel_id,
            "wake word matched"
        );
        let inner = Arc::clone(&self.inner);
        let message = message.clone();
        tokio::spawn(async move { inner.run(message).await });
        Ok(HandlerResult::Processed)
    }
}
