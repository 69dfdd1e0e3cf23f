//! Razorpay webhook intake.
//!
//! The body must reach the engine untouched: the HMAC is computed over the
//! raw bytes, so this handler extracts `String`, not `Json`.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::json;

use crate::error::AppError;
use crate::startup::AppState;

/// POST /webhooks/razorpay
pub async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let signature = headers
        .get("X-Razorpay-Signature")
        .and_then(|value| value.to_str().ok());
    let event_id = headers
        .get("x-razorpay-event-id")
        .and_then(|value| value.to_str().ok());

    let outcome = state
        .subscriptions
        .on_webhook_event(signature, event_id, &body)
        .await?;
    Ok((StatusCode::OK, Json(json!({ "status": outcome.as_str() }))))
}
