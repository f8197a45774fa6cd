use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

use crate::blocks::MessageTemplate;

const MESSAGE_BUS_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlackEnvelope {
    pub envelope_id: String,
    pub event: SlackEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlackEvent {
    Message(MessageEvent),
    SlashCommand(SlashCommandPayload),
    Unsupported { event_type: String },
}

impl SlackEvent {
    pub fn event_type(&self) -> SlackEventType {
        match self {
            Self::Message(_) => SlackEventType::Message,
            Self::SlashCommand(_) => SlackEventType::SlashCommand,
            Self::Unsupported { .. } => SlackEventType::Unsupported,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlackEventType {
    Message,
    SlashCommand,
    Unsupported,
}

/// An inbound channel or thread message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct MessageEvent {
    #[serde(rename = "channel")]
    pub channel_id: String,
    pub ts: String,
    #[serde(default)]
    pub thread_ts: Option<String>,
    #[serde(default, rename = "user")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl MessageEvent {
    /// Plain human message: has text and a user, no subtype, not posted by a bot.
    pub fn is_plain_user_message(&self) -> bool {
        self.text.is_some()
            && self.user_id.is_some()
            && self.subtype.is_none()
            && self.bot_id.is_none()
    }

    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    pub fn user(&self) -> &str {
        self.user_id.as_deref().unwrap_or_default()
    }

    pub fn is_in_thread(&self, channel: &str, thread_ts: &str) -> bool {
        self.channel_id == channel && self.thread_ts.as_deref() == Some(thread_ts)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct SlashCommandPayload {
    pub command: String,
    #[serde(default)]
    pub text: String,
    pub channel_id: String,
    pub user_id: String,
    #[serde(default)]
    pub trigger_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventContext {
    pub correlation_id: String,
}

impl Default for EventContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Responded(MessageTemplate),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("unsupported slash command: {0}")]
    UnsupportedCommand(String),
    #[error("command handler failure: {0}")]
    Command(String),
    #[error("message handler failure: {0}")]
    Message(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn event_type(&self) -> SlackEventType;
    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError>;
}

/// Fan-out of inbound messages to running rounds.
#[derive(Clone, Debug)]
pub struct MessageBus {
    sender: broadcast::Sender<MessageEvent>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_capacity(MESSAGE_BUS_CAPACITY)
    }

    /// A subscriber more than `capacity` messages behind skips the oldest ones.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MessageEvent> {
        self.sender.subscribe()
    }

    /// Returns how many subscribers received the message.
    pub fn publish(&self, message: MessageEvent) -> usize {
        self.sender.send(message).unwrap_or(0)
    }
}

/// Routes envelopes to every handler registered for the event type.
///
/// Messages are published on the bus before any handler runs, so rounds see
/// them in delivery order. Handlers must return promptly; long work is spawned.
#[derive(Default)]
pub struct EventDispatcher {
    bus: MessageBus,
    handlers: HashMap<SlackEventType, Vec<Arc<dyn EventHandler>>>,
}

impl EventDispatcher {
    pub fn new(bus: MessageBus) -> Self {
        Self { bus, handlers: HashMap::new() }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: EventHandler + 'static,
    {
        self.register_shared(Arc::new(handler));
    }

    pub fn register_shared(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(handler.event_type()).or_default().push(handler);
    }

    pub async fn dispatch(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, DispatchError> {
        if let SlackEvent::Message(message) = &envelope.event {
            self.bus.publish(message.clone());
        }

        let Some(handlers) = self.handlers.get(&envelope.event.event_type()) else {
            return Ok(HandlerResult::Ignored);
        };

        let mut outcome = HandlerResult::Ignored;
        for handler in handlers {
            match handler.handle(envelope, ctx).await {
                Ok(HandlerResult::Responded(message)) => {
                    if !matches!(outcome, HandlerResult::Responded(_)) {
                        outcome = HandlerResult::Responded(message);
                    }
                }
                Ok(HandlerResult::Processed) => {
                    if outcome == HandlerResult::Ignored {
                        outcome = HandlerResult::Processed;
                    }
                }
                Ok(HandlerResult::Ignored) => {}
                Err(error) if handlers.len() == 1 => return Err(error.into()),
                Err(error) => {
                    warn!(
                        event_name = "slack.dispatch.handler_failed",
                        correlation_id = %ctx.correlation_id,
                        envelope_id = %envelope.envelope_id,
                        error = %error,
                        "event handler failed; remaining handlers still run"
                    );
                }
            }
        }
        Ok(outcome)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }
}

#[async_trait]
pub trait SlashCommandService: Send + Sync {
    /// The command this service answers, including the leading slash.
    fn command(&self) -> &str;

    async fn handle_command(
        &self,
        payload: &SlashCommandPayload,
        ctx: &EventContext,
    ) -> Result<MessageTemplate, EventHandlerError>;
}

#[derive(Default)]
pub struct SlashCommandHandler {
    services: HashMap<String, Arc<dyn SlashCommandService>>,
}

impl SlashCommandHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: Arc<dyn SlashCommandService>) -> Self {
        self.services.insert(service.command().to_string(), service);
        self
    }
}

#[async_trait]
impl EventHandler for SlashCommandHandler {
    fn event_type(&self) -> SlackEventType {
        SlackEventType::SlashCommand
    }

    async fn handle(
        &self,
        envelope: &SlackEnvelope,
        ctx: &EventContext,
    ) -> Result<HandlerResult, EventHandlerError> {
        let SlackEvent::SlashCommand(payload) = &envelope.event else {
            return Ok(HandlerResult::Ignored);
        };

        let Some(service) = self.services.get(payload.command.trim()) else {
            return Err(EventHandlerError::UnsupportedCommand(payload.command.clone()));
        };
        let message = service.handle_command(payload, ctx).await?;
        Ok(HandlerResult::Responded(message))
    }
}

/// Splits `verb rest...` the way every slash command here is parsed.
pub fn split_command_text(text: &str) -> (String, String) {
    let trimmed = text.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb.to_lowercase(), rest.trim().to_string()),
        None => (trimmed.to_lowercase(), String::new()),
    }
}
