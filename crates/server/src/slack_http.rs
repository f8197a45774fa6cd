//! Events API and slash command endpoints.
//!
//! Every request is checked against the signing secret before its body is decoded.

use std::sync::Arc;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{FromRequest, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use chrono::Utc;
use quizbot_slack::events_api::{parse_events_body, slash_command_envelope, EventsApiRequest};
use quizbot_slack::signature::{verify_request, SignatureError};
use quizbot_slack::{EventContext, EventDispatcher, HandlerResult, SlashCommandPayload};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SIGNATURE_HEADER: &str = "x-slack-signature";
const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const RETRY_HEADER: &str = "x-slack-retry-num";
const MAX_BODY_BYTES: usize = 1 << 20;

#[derive(Clone)]
pub struct SlackHttpState {
    dispatcher: Arc<EventDispatcher>,
    signing_secret: SecretString,
}

impl SlackHttpState {
    pub fn new(dispatcher: Arc<EventDispatcher>, signing_secret: SecretString) -> Self {
        Self { dispatcher, signing_secret }
    }

    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), SignatureError> {
        let header = |name: &str| headers.get(name).and_then(|value| value.to_str().ok());
        let timestamp = header(TIMESTAMP_HEADER).unwrap_or_default();
        let signature = header(SIGNATURE_HEADER).ok_or(SignatureError::MalformedSignature)?;
        verify_request(
            self.signing_secret.expose_secret().as_bytes(),
            timestamp,
            body,
            signature,
            Utc::now().timestamp(),
        )
    }
}

pub fn router(state: SlackHttpState) -> Router {
    Router::new()
        .route("/slack/events", post(events))
        .route("/slack/commands", post(commands))
        .with_state(state)
}

/// Serves until `shutdown` fires, then drains in-flight requests.
pub async fn spawn(
    bind_address: &str,
    port: u16,
    state: SlackHttpState,
    mut shutdown: watch::Receiver<()>,
) -> std::io::Result<JoinHandle<()>> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.slack_http.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "slack endpoints started"
    );

    Ok(tokio::spawn(async move {
        let serve = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        });
        if let Err(error) = serve.await {
            error!(
                event_name = "system.slack_http.error",
                correlation_id = "bootstrap",
                error = %error,
                "slack endpoint server terminated unexpectedly"
            );
        }
    }))
}

fn rejected(error: SignatureError) -> Response {
    warn!(
        event_name = "slack.http.signature_rejected",
        error = %error,
        "rejected unsigned slack request"
    );
    StatusCode::UNAUTHORIZED.into_response()
}

pub async fn events(
    State(state): State<SlackHttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(error) = state.verify(&headers, &body) {
        return rejected(error);
    }

    let envelope = match parse_events_body(&body) {
        Ok(EventsApiRequest::UrlVerification { challenge }) => {
            return Json(json!({ "challenge": challenge })).into_response();
        }
        Ok(EventsApiRequest::Event(envelope)) => envelope,
        Err(error) => {
            warn!(event_name = "slack.http.bad_body", error = %error, "undecodable events body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    // The first delivery was already handled; the retry only means it was acked late.
    if headers.contains_key(RETRY_HEADER) {
        debug!(
            event_name = "slack.http.retry_skipped",
            envelope_id = %envelope.envelope_id,
            "skipping redelivered event"
        );
        return StatusCode::OK.into_response();
    }

    let ctx = EventContext { correlation_id: Uuid::new_v4().to_string() };
    if let Err(error) = state.dispatcher.dispatch(&envelope, &ctx).await {
        warn!(
            event_name = "slack.http.dispatch_failed",
            correlation_id = %ctx.correlation_id,
            envelope_id = %envelope.envelope_id,
            error = %error,
            "event dispatch failed"
        );
    }
    StatusCode::OK.into_response()
}

pub async fn commands(State(state): State<SlackHttpState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };
    if let Err(error) = state.verify(&parts.headers, &body) {
        return rejected(error);
    }

    let request = Request::from_parts(parts, Body::from(body));
    let payload = match Form::<SlashCommandPayload>::from_request(request, &()).await {
        Ok(Form(payload)) => payload,
        Err(rejection) => return rejection.into_response(),
    };

    let ctx = EventContext { correlation_id: Uuid::new_v4().to_string() };
    info!(
        event_name = "slack.http.command",
        correlation_id = %ctx.correlation_id,
        command = %payload.command,
        channel_id = %payload.channel_id,
        user_id = %payload.user_id,
        "slash command received"
    );

    let envelope = slash_command_envelope(payload);
    match state.dispatcher.dispatch(&envelope, &ctx).await {
        Ok(HandlerResult::Responded(message)) => Json(json!({
            "response_type": "ephemeral",
            "text": message.fallback_text,
            "blocks": message.blocks,
        }))
        .into_response(),
        Ok(HandlerResult::Processed | HandlerResult::Ignored) => StatusCode::OK.into_response(),
        Err(error) => {
            warn!(
                event_name = "slack.http.command_failed",
                correlation_id = %ctx.correlation_id,
                error = %error,
                "slash command failed"
            );
            Json(json!({
                "response_type": "ephemeral",
                "text": format!("コマンドの実行に失敗しました: {error}"),
            }))
            .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use quizbot_slack::events::{SlackEventType, SlashCommandHandler};
    use quizbot_slack::signature::sign_request;
    use quizbot_slack::{
        EventContext, EventDispatcher, EventHandler, EventHandlerError, HandlerResult,
        MessageBus, MessageBuilder, MessageTemplate, SlackEnvelope, SlashCommandPayload,
        SlashCommandService,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use super::{router, SlackHttpState};

    const SECRET: &str = "signing-secret";
    const MESSAGE: &str = r#"{"type":"event_callback","event_id":"Ev1",
        "event":{"type":"message","channel":"C1","user":"U1","text":"hi","ts":"1.0"}}"#;

    struct EchoCommand;

    #[async_trait]
    impl SlashCommandService for EchoCommand {
        fn command(&self) -> &str {
            "/echo"
        }

        async fn handle_command(
            &self,
            payload: &SlashCommandPayload,
            _ctx: &EventContext,
        ) -> Result<MessageTemplate, EventHandlerError> {
            Ok(MessageBuilder::new(format!("{} said {}", payload.user_id, payload.text)).build())
        }
    }

    #[derive(Clone, Default)]
    struct CountingHandler {
        seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn event_type(&self) -> SlackEventType {
            SlackEventType::Message
        }

        async fn handle(
            &self,
            _envelope: &SlackEnvelope,
            _ctx: &EventContext,
        ) -> Result<HandlerResult, EventHandlerError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerResult::Processed)
        }
    }

    fn app(counter: &CountingHandler) -> axum::Router {
        let mut dispatcher = EventDispatcher::new(MessageBus::new());
        dispatcher.register(counter.clone());
        dispatcher.register(SlashCommandHandler::new().with_service(Arc::new(EchoCommand)));
        router(SlackHttpState::new(Arc::new(dispatcher), SECRET.to_string().into()))
    }

    fn signed(uri: &str, content_type: &str, body: &str) -> Request<Body> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign_request(SECRET.as_bytes(), &timestamp, body.as_bytes());
        Request::post(uri)
            .header("content-type", content_type)
            .header("x-slack-request-timestamp", timestamp)
            .header("x-slack-signature", signature)
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn url_verification_echoes_the_challenge() {
        let counter = CountingHandler::default();
        let body = r#"{"type":"url_verification","challenge":"abc123"}"#;

        let response = app(&counter)
            .oneshot(signed("/slack/events", "application/json", body))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["challenge"], "abc123");
    }

    #[tokio::test]
    async fn unsigned_requests_are_rejected_before_dispatch() {
        let counter = CountingHandler::default();
        let mut request = signed("/slack/events", "application/json", MESSAGE);
        request.headers_mut().insert("x-slack-signature", "v0=00".parse().expect("header"));

        let response = app(&counter).oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(counter.seen.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn message_events_reach_handlers_once() {
        let counter = CountingHandler::default();

        let response = app(&counter)
            .oneshot(signed("/slack/events", "application/json", MESSAGE))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        let mut retry = signed("/slack/events", "application/json", MESSAGE);
        retry.headers_mut().insert("x-slack-retry-num", "1".parse().expect("header"));
        let response = app(&counter).oneshot(retry).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);

        assert_eq!(counter.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slash_commands_reply_ephemerally() {
        let counter = CountingHandler::default();
        let body = "command=%2Fecho&text=hello&channel_id=C1&user_id=U1&trigger_id=T1";

        let response = app(&counter)
            .oneshot(signed("/slack/commands", "application/x-www-form-urlencoded", body))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let reply = json_body(response).await;
        assert_eq!(reply["response_type"], "ephemeral");
        assert_eq!(reply["text"], "U1 said hello");
    }

    #[tokio::test]
    async fn unknown_commands_report_the_failure() {
        let counter = CountingHandler::default();
        let body = "command=%2Fnope&text=&channel_id=C1&user_id=U1";

        let response = app(&counter)
            .oneshot(signed("/slack/commands", "application/x-www-form-urlencoded", body))
            .await
            .expect("response");

        let reply = json_body(response).await;
        assert!(reply["text"].as_str().unwrap_or_default().contains("/nope"));
    }
}
