//! Webhook ingress: verification handshake, signed deliveries, health.
//!
//! Accepted deliveries always get 200 so the platform stops redelivering;
//! processing happens on the event sink, after the response.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use hmac::{Hmac, Mac};
use mrelay_core::pipeline::EventSink;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

use crate::types::WebhookPayload;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

#[derive(Clone)]
pub struct WebhookState {
    pub verify_token: String,
    /// When set, deliveries must be signed with it.
    pub app_secret: Option<String>,
    pub sink: Arc<dyn EventSink>,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook", get(verify).post(receive))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn verify(State(state): State<WebhookState>, Query(params): Query<VerifyParams>) -> Response {
    let subscribed = params.mode.as_deref() == Some("subscribe");
    let token_ok = params
        .verify_token
        .as_deref()
        .is_some_and(|t| constant_time_eq(t, &state.verify_token));

    if subscribed && token_ok {
        info!("webhook verified");
        (StatusCode::OK, params.challenge.unwrap_or_default()).into_response()
    } else {
        warn!(mode = ?params.mode, "webhook verification rejected");
        StatusCode::FORBIDDEN.into_response()
    }
}

async fn receive(State(state): State<WebhookState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    if let Some(secret) = state.app_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(&body, signature, secret) {
            warn!("webhook signature mismatch");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "webhook body is not JSON");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    let payload: WebhookPayload = serde_json::from_value(value).unwrap_or_else(|e| {
        debug!(error = %e, "unexpected webhook shape, treating as empty");
        WebhookPayload::default()
    });

    let events = payload.into_events();
    if events.is_empty() {
        debug!("webhook carried no messages");
    }
    for event in events {
        debug!(event_id = %event.event_id, user = %event.sender_id, "message accepted");
        state.sink.submit(event);
    }
    StatusCode::OK
}

async fn health() -> &'static str {
    "ok"
}

/// Check `sha256=<hex>` against the HMAC-SHA256 of the raw body.
pub fn verify_signature(body: &[u8], signature_header: &str, app_secret: &str) -> bool {
    let Some(expected) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&computed, &expected.to_ascii_lowercase())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}
