//! Webhook HTTP surface.
//!
//! Each channel gets its own path with the platform's two verbs: `GET` for the
//! subscription handshake and `POST` for event delivery. The POST handler
//! works from the raw bytes so the signature check covers exactly what was
//! sent, before any JSON work.

use crate::normalize::{self, EventEnvelope};
use crate::pipeline::ReplyPipeline;
use crate::signature;
use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Deserialize;
use std::sync::Arc;

pub struct WebhookState {
    pub pipeline: ReplyPipeline,
    pub verify_token: String,
    pub app_secret: Option<String>,
    pub allow_unsigned: bool,
}

pub fn router(state: Arc<WebhookState>, debug_routes: bool) -> Router {
    let mut router = Router::new()
        .route("/", get(health))
        .route(
            "/webhook/messenger",
            get(verify_subscription).post(ingest_events),
        )
        .route(
            "/webhook/instagram",
            get(verify_subscription).post(ingest_events),
        )
        .route(
            "/webhook/whatsapp",
            get(verify_subscription).post(ingest_events),
        );
    if debug_routes {
        router = router.route("/debug-verify", get(debug_verify));
    }
    router.with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn verify_subscription(
    State(state): State<Arc<WebhookState>>,
    Query(query): Query<VerifyQuery>,
) -> impl IntoResponse {
    match echo_challenge(&query, &state.verify_token) {
        Some(challenge) => (StatusCode::OK, challenge).into_response(),
        None => (StatusCode::FORBIDDEN, "verification failed".to_string()).into_response(),
    }
}

/// Subscription handshake: echo the challenge iff the mode is "subscribe" and
/// the token matches the configured one. An unconfigured token never matches.
fn echo_challenge(query: &VerifyQuery, expected_token: &str) -> Option<String> {
    let mode = query.mode.as_deref().map(str::trim).unwrap_or_default();
    let token = query.verify_token.as_deref().map(str::trim).unwrap_or_default();
    let expected = expected_token.trim();
    if mode.eq_ignore_ascii_case("subscribe") && !expected.is_empty() && token == expected {
        return Some(query.challenge.clone().unwrap_or_default());
    }
    None
}

async fn ingest_events(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if !state.allow_unsigned {
        let header = headers
            .get("x-hub-signature-256")
            .and_then(|value| value.to_str().ok());
        if !signature::verify_signature(state.app_secret.as_deref(), &body, header) {
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({
                    "status": "error",
                    "error": "invalid x-hub-signature-256",
                })),
            )
                .into_response();
        }
    }

    let envelope: EventEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "status": "error",
                    "error": format!("invalid webhook payload: {error}"),
                })),
            )
                .into_response();
        }
    };

    // Sequential within the batch, so replies go out in payload order. A
    // failed event logs and does not stop its siblings; the platform gets a
    // 200 either way so it will not re-deliver the whole batch.
    let messages = normalize::normalize(&envelope);
    let mut accepted = 0usize;
    let mut failed = 0usize;
    for message in &messages {
        match state.pipeline.handle_inbound(message).await {
            Ok(()) => accepted += 1,
            Err(error) => {
                failed += 1;
                tracing::warn!(
                    %error,
                    channel = %message.channel,
                    "event processing failed; continuing with siblings"
                );
            }
        }
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "accepted": accepted,
            "failed": failed,
        })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct DebugVerifyQuery {
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
}

/// Mirrors what the handshake sees without disclosing the configured token:
/// its length plus a first-and-last-character preview.
async fn debug_verify(
    State(state): State<Arc<WebhookState>>,
    Query(query): Query<DebugVerifyQuery>,
) -> Json<serde_json::Value> {
    let expected = state.verify_token.trim();
    let preview = match (expected.chars().next(), expected.chars().last()) {
        (Some(first), Some(last)) => format!("{first}...{last}"),
        _ => "(empty)".to_string(),
    };
    Json(serde_json::json!({
        "got_from_url": query.verify_token.unwrap_or_default(),
        "expected_len": expected.chars().count(),
        "expected_preview": preview,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(mode: Option<&str>, token: Option<&str>, challenge: Option<&str>) -> VerifyQuery {
        VerifyQuery {
            mode: mode.map(ToOwned::to_owned),
            verify_token: token.map(ToOwned::to_owned),
            challenge: challenge.map(ToOwned::to_owned),
        }
    }

    #[test]
    fn matching_subscription_echoes_challenge() {
        let q = query(Some("subscribe"), Some("letmein"), Some("1158201444"));
        assert_eq!(echo_challenge(&q, "letmein").as_deref(), Some("1158201444"));
    }

    #[test]
    fn wrong_token_or_mode_is_rejected() {
        let q = query(Some("subscribe"), Some("wrong"), Some("1158201444"));
        assert_eq!(echo_challenge(&q, "letmein"), None);

        let q = query(Some("unsubscribe"), Some("letmein"), Some("1158201444"));
        assert_eq!(echo_challenge(&q, "letmein"), None);

        let q = query(None, Some("letmein"), Some("1158201444"));
        assert_eq!(echo_challenge(&q, "letmein"), None);
    }

    #[test]
    fn unconfigured_token_never_matches() {
        let q = query(Some("subscribe"), Some(""), Some("1158201444"));
        assert_eq!(echo_challenge(&q, ""), None);
    }
}
