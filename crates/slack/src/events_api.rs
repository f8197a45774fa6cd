//! Decoding of Events API request bodies into envelopes.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::events::{MessageEvent, SlackEnvelope, SlackEvent, SlashCommandPayload};

#[derive(Debug, Error)]
pub enum EventsApiError {
    #[error("events api body is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventsApiRequest {
    UrlVerification { challenge: String },
    Event(SlackEnvelope),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawRequest {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        #[serde(default)]
        event_id: String,
        event: Value,
    },
    #[serde(other)]
    Other,
}

pub fn parse_events_body(body: &[u8]) -> Result<EventsApiRequest, EventsApiError> {
    let raw: RawRequest = serde_json::from_slice(body)?;
    Ok(match raw {
        RawRequest::UrlVerification { challenge } => {
            EventsApiRequest::UrlVerification { challenge }
        }
        RawRequest::EventCallback { event_id, event } => EventsApiRequest::Event(SlackEnvelope {
            envelope_id: event_id,
            event: decode_event(event),
        }),
        RawRequest::Other => EventsApiRequest::Event(SlackEnvelope {
            envelope_id: String::new(),
            event: SlackEvent::Unsupported { event_type: "unknown_request".to_string() },
        }),
    })
}

fn decode_event(event: Value) -> SlackEvent {
    let event_type = event.get("type").and_then(Value::as_str).unwrap_or("unknown").to_string();
    if event_type != "message" {
        return SlackEvent::Unsupported { event_type };
    }
    match serde_json::from_value::<MessageEvent>(event) {
        Ok(message) => SlackEvent::Message(message),
        Err(_) => SlackEvent::Unsupported { event_type },
    }
}

/// Slash commands arrive as `application/x-www-form-urlencoded`.
pub fn slash_command_envelope(payload: SlashCommandPayload) -> SlackEnvelope {
    let envelope_id = if payload.trigger_id.is_empty() {
        format!("cmd-{}-{}", payload.channel_id, payload.user_id)
    } else {
        payload.trigger_id.clone()
    };
    SlackEnvelope { envelope_id, event: SlackEvent::SlashCommand(payload) }
}

#[cfg(test)]
mod tests {
    use super::{parse_events_body, slash_command_envelope, EventsApiRequest};
    use crate::events::{SlackEvent, SlashCommandPayload};

    #[test]
    fn url_verification_returns_challenge() {
        let body = br#"{"type":"url_verification","challenge":"abc123","token":"x"}"#;
        let parsed = parse_events_body(body).expect("parse");
        assert_eq!(parsed, EventsApiRequest::UrlVerification { challenge: "abc123".to_string() });
    }

    #[test]
    fn message_event_callback_decodes_thread_fields() {
        let body = r#"{
            "type": "event_callback",
            "event_id": "Ev123",
            "event": {
                "type": "message",
                "channel": "CSANDBOX",
                "user": "U42",
                "text": "ふじさん",
                "ts": "1700000001.000200",
                "thread_ts": "1700000000.000100"
            }
        }"#.as_bytes();

        let EventsApiRequest::Event(envelope) = parse_events_body(body).expect("parse") else {
            panic!("expected event envelope");
        };
        assert_eq!(envelope.envelope_id, "Ev123");
        let SlackEvent::Message(message) = envelope.event else {
            panic!("expected message event");
        };
        assert!(message.is_in_thread("CSANDBOX", "1700000000.000100"));
        assert_eq!(message.user(), "U42");
        assert!(message.is_plain_user_message());
    }

    #[test]
    fn bot_messages_and_other_events_are_kept_distinct() {
        let bot = br#"{"type":"event_callback","event_id":"Ev1","event":{"type":"message","subtype":"bot_message","bot_id":"B1","channel":"C1","ts":"1.0","text":"hi"}}"#;
        let EventsApiRequest::Event(envelope) = parse_events_body(bot).expect("parse") else {
            panic!("expected event envelope");
        };
        assert!(matches!(
            envelope.event,
            SlackEvent::Message(ref message) if !message.is_plain_user_message()
        ));

        let reaction = br#"{"type":"event_callback","event_id":"Ev2","event":{"type":"reaction_added"}}"#;
        let EventsApiRequest::Event(envelope) = parse_events_body(reaction).expect("parse") else {
            panic!("expected event envelope");
        };
        assert_eq!(
            envelope.event,
            SlackEvent::Unsupported { event_type: "reaction_added".to_string() }
        );
    }

    #[test]
    fn slash_command_envelope_uses_trigger_id() {
        let envelope = slash_command_envelope(SlashCommandPayload {
            command: "/slow-quiz".to_string(),
            trigger_id: "T123".to_string(),
            ..SlashCommandPayload::default()
        });
        assert_eq!(envelope.envelope_id, "T123");
    }
}
