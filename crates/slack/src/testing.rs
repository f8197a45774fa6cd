//! In-memory Web API that records every call, for tests in this and downstream crates.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};

use crate::blocks::MessagePayload;
use crate::web::{PostedMessage, SlackWebApi, WebApiError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCall {
    Post(MessagePayload),
    Ephemeral { channel: String, user: String, text: String },
    Update { ts: String, payload: MessagePayload },
    Delete { channel: String, ts: String, as_admin: bool },
    Reaction { channel: String, ts: String, name: String },
}

#[derive(Default)]
struct RecorderState {
    calls: Vec<RecordedCall>,
    next_ts: u64,
    fail_posts_containing: Option<String>,
    admin_token: bool,
}

pub struct RecordingWebApi {
    state: Mutex<RecorderState>,
    posts: watch::Sender<usize>,
}

impl Default for RecordingWebApi {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingWebApi {
    pub fn new() -> Self {
        Self::with_admin_token(true)
    }

    pub fn without_admin_token() -> Self {
        Self::with_admin_token(false)
    }

    fn with_admin_token(admin_token: bool) -> Self {
        let (posts, _) = watch::channel(0);
        Self { state: Mutex::new(RecorderState { admin_token, ..RecorderState::default() }), posts }
    }

    /// Makes every `post_message` whose text contains `needle` fail.
    pub async fn fail_posts_containing(&self, needle: impl Into<String>) {
        self.state.lock().await.fail_posts_containing = Some(needle.into());
    }

    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn posts(&self) -> Vec<MessagePayload> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Post(payload) => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn ephemerals(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Ephemeral { user, text, .. } => Some((user.clone(), text.clone())),
                _ => None,
            })
            .collect()
    }

    pub async fn reactions(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                RecordedCall::Reaction { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn post_texts(&self) -> Vec<String> {
        self.posts().await.iter().map(MessagePayload::all_text).collect()
    }

    /// Waits (bounded by a generous timeout) until at least `count` messages were posted.
    pub async fn wait_for_posts(&self, count: usize) -> bool {
        let mut receiver = self.posts.subscribe();
        let reached = receiver.wait_for(|posted| *posted >= count);
        tokio::time::timeout(Duration::from_secs(3600), reached)
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }
}

#[async_trait]
impl SlackWebApi for RecordingWebApi {
    async fn post_message(&self, message: &MessagePayload) -> Result<PostedMessage, WebApiError> {
        let mut state = self.state.lock().await;
        if let Some(needle) = &state.fail_posts_containing {
            if message.all_text().contains(needle.as_str()) {
                return Err(WebApiError::Api {
                    method: "chat.postMessage".to_string(),
                    error: "channel_not_found".to_string(),
                });
            }
        }
        state.next_ts += 1;
        let ts = format!("1700000000.{:06}", state.next_ts);
        state.calls.push(RecordedCall::Post(message.clone()));
        let posted =
            state.calls.iter().filter(|call| matches!(call, RecordedCall::Post(_))).count();
        drop(state);
        self.posts.send_replace(posted);

        Ok(PostedMessage {
            channel: message.channel.clone(),
            ts,
            thread_ts: message.thread_ts.clone(),
        })
    }

    async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
    ) -> Result<(), WebApiError> {
        self.state.lock().await.calls.push(RecordedCall::Ephemeral {
            channel: channel.to_string(),
            user: user.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn update_message(&self, ts: &str, message: &MessagePayload) -> Result<(), WebApiError> {
        self.state
            .lock()
            .await
            .calls
            .push(RecordedCall::Update { ts: ts.to_string(), payload: message.clone() });
        Ok(())
    }

    async fn delete_message(
        &self,
        channel: &str,
        ts: &str,
        as_admin: bool,
    ) -> Result<(), WebApiError> {
        let mut state = self.state.lock().await;
        if as_admin && !state.admin_token {
            return Err(WebApiError::MissingAdminToken("chat.delete".to_string()));
        }
        state.calls.push(RecordedCall::Delete {
            channel: channel.to_string(),
            ts: ts.to_string(),
            as_admin,
        });
        Ok(())
    }

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), WebApiError> {
        self.state.lock().await.calls.push(RecordedCall::Reaction {
            channel: channel.to_string(),
            ts: ts.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    async fn permalink(&self, channel: &str, ts: &str) -> Result<String, WebApiError> {
        Ok(format!("https://example.slack.com/archives/{channel}/p{}", ts.replace('.', "")))
    }
}
