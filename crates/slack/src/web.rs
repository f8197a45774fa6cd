//! Outbound Slack Web API calls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::blocks::MessagePayload;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
    pub thread_ts: Option<String>,
}

impl PostedMessage {
    /// Timestamp replies should thread under.
    pub fn thread_anchor(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebApiError {
    #[error("slack api `{method}` returned error `{error}`")]
    Api { method: String, error: String },
    #[error("slack api `{method}` request failed: {detail}")]
    Transport { method: String, detail: String },
    #[error("slack api `{method}` returned an unexpected body: {detail}")]
    Decode { method: String, detail: String },
    #[error("slack api `{0}` requires an admin token, none is configured")]
    MissingAdminToken(String),
}

#[async_trait]
pub trait SlackWebApi: Send + Sync {
    async fn post_message(&self, message: &MessagePayload) -> Result<PostedMessage, WebApiError>;

    async fn post_ephemeral(&self, channel: &str, user: &str, text: &str)
        -> Result<(), WebApiError>;

    /// Replaces text and blocks of a message previously posted by the bot.
    async fn update_message(&self, ts: &str, message: &MessagePayload) -> Result<(), WebApiError>;

    /// Deletes with the bot token, or with the admin token when `as_admin` is set.
    async fn delete_message(&self, channel: &str, ts: &str, as_admin: bool)
        -> Result<(), WebApiError>;

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), WebApiError>;

    async fn permalink(&self, channel: &str, ts: &str) -> Result<String, WebApiError>;
}

pub struct HttpSlackWebApi {
    client: Client,
    base_url: String,
    bot_token: SecretString,
    admin_token: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    rest: Value,
}

impl HttpSlackWebApi {
    pub fn new(
        base_url: impl Into<String>,
        bot_token: SecretString,
        admin_token: Option<SecretString>,
    ) -> Result<Self, WebApiError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build().map_err(|error| {
            WebApiError::Transport { method: "client.build".to_string(), detail: error.to_string() }
        })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bot_token,
            admin_token,
        })
    }

    async fn call(
        &self,
        method: &str,
        token: &SecretString,
        body: Value,
    ) -> Result<Value, WebApiError> {
        let request = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(token.expose_secret())
            .json(&body);
        self.send(method, request).await
    }

    /// Read methods such as `chat.getPermalink` do not accept JSON bodies.
    async fn call_form(
        &self,
        method: &str,
        token: &SecretString,
        fields: &[(&str, &str)],
    ) -> Result<Value, WebApiError> {
        let request = self
            .client
            .post(format!("{}/{method}", self.base_url))
            .bearer_auth(token.expose_secret())
            .form(fields);
        self.send(method, request).await
    }

    async fn send(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, WebApiError> {
        let response = request.send().await.map_err(|error| WebApiError::Transport {
            method: method.to_string(),
            detail: error.to_string(),
        })?;
        let envelope: ApiEnvelope = response.json().await.map_err(|error| WebApiError::Decode {
            method: method.to_string(),
            detail: error.to_string(),
        })?;

        if !envelope.ok {
            return Err(WebApiError::Api {
                method: method.to_string(),
                error: envelope.error.unwrap_or_else(|| "unknown_error".to_string()),
            });
        }
        debug!(event_name = "slack.api.ok", method, "slack api call succeeded");
        Ok(envelope.rest)
    }
}

fn string_field(method: &str, body: &Value, pointer: &str) -> Result<String, WebApiError> {
    body.pointer(pointer).and_then(Value::as_str).map(str::to_string).ok_or_else(|| {
        WebApiError::Decode { method: method.to_string(), detail: format!("missing `{pointer}`") }
    })
}

#[async_trait]
impl SlackWebApi for HttpSlackWebApi {
    async fn post_message(&self, message: &MessagePayload) -> Result<PostedMessage, WebApiError> {
        let body = serde_json::to_value(message).map_err(|error| WebApiError::Decode {
            method: "chat.postMessage".to_string(),
            detail: error.to_string(),
        })?;
        let response = self.call("chat.postMessage", &self.bot_token, body).await?;
        Ok(PostedMessage {
            channel: string_field("chat.postMessage", &response, "/channel")?,
            ts: string_field("chat.postMessage", &response, "/ts")?,
            thread_ts: response
                .pointer("/message/thread_ts")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
    ) -> Result<(), WebApiError> {
        let body = json!({ "channel": channel, "user": user, "text": text });
        self.call("chat.postEphemeral", &self.bot_token, body).await.map(|_| ())
    }

    async fn update_message(&self, ts: &str, message: &MessagePayload) -> Result<(), WebApiError> {
        let body = json!({
            "channel": message.channel,
            "ts": ts,
            "text": message.text,
            "blocks": message.blocks,
        });
        self.call("chat.update", &self.bot_token, body).await.map(|_| ())
    }

    async fn delete_message(
        &self,
        channel: &str,
        ts: &str,
        as_admin: bool,
    ) -> Result<(), WebApiError> {
        let token = if as_admin {
            self.admin_token
                .as_ref()
                .ok_or_else(|| WebApiError::MissingAdminToken("chat.delete".to_string()))?
        } else {
            &self.bot_token
        };
        let body = json!({ "channel": channel, "ts": ts });
        self.call("chat.delete", token, body).await.map(|_| ())
    }

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<(), WebApiError> {
        let body = json!({ "channel": channel, "timestamp": ts, "name": name });
        match self.call("reactions.add", &self.bot_token, body).await {
            Err(WebApiError::Api { error, .. }) if error == "already_reacted" => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn permalink(&self, channel: &str, ts: &str) -> Result<String, WebApiError> {
        let fields = [("channel", channel), ("message_ts", ts)];
        let response = self.call_form("chat.getPermalink", &self.bot_token, &fields).await?;
        string_field("chat.getPermalink", &response, "/permalink")
    }
}
