//! Slack integration for the quiz bot
//!
//! - **Blocks** (`blocks`) - message payloads, Block Kit builders, error reports
//! - **Web API** (`web`) - outbound `chat.*` / `reactions.*` calls
//! - **Events** (`events`) - inbound event model, message bus, dispatcher, slash commands
//! - **Events API** (`events_api`, `signature`) - HTTP request decoding and signing checks
//! - **Channel gate** (`channel_gate`) - wake-word channel restrictions
//!
//! # Architecture
//!
//! ```text
//! HTTP request → signature check → events_api → EventDispatcher ─┬→ MessageBus → running rounds
//!                                                                └→ handlers (wake words, commands)
//! ```

pub mod blocks;
pub mod channel_gate;
pub mod events;
pub mod events_api;
pub mod signature;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod web;

pub use blocks::{BotIdentity, MessageBuilder, MessagePayload, MessageTemplate};
pub use channel_gate::{ChannelLimitedBot, WakeError, WakeResponse, WakeWordHandler};
pub use events::{
    EventContext, EventDispatcher, EventHandler, EventHandlerError, HandlerResult, MessageBus,
    MessageEvent, SlackEnvelope, SlackEvent, SlashCommandPayload, SlashCommandService,
};
pub use web::{HttpSlackWebApi, PostedMessage, SlackWebApi, WebApiError};
