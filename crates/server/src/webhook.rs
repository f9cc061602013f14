use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use leavedesk_line::{DispatchError, SIGNATURE_HEADER};
use serde_json::{json, Value};
use tracing::{error, warn};
use uuid::Uuid;

use crate::bootstrap::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/webhook", post(webhook))
}

/// Dispatch runs on its own task so a dropped connection cannot cut a batch
/// short between a ledger write and its reply.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let correlation_id = Uuid::new_v4().to_string();
    let signature =
        headers.get(SIGNATURE_HEADER).and_then(|value| value.to_str().ok()).map(str::to_owned);

    let dispatcher = Arc::clone(&state.dispatcher);
    let task_correlation_id = correlation_id.clone();
    let outcome = tokio::spawn(async move {
        dispatcher.handle_webhook(&body, signature.as_deref(), &task_correlation_id).await
    })
    .await;

    match outcome {
        Ok(Ok(_)) => (StatusCode::OK, Json(json!({ "success": true }))),
        Ok(Err(DispatchError::Signature(_))) => {
            (StatusCode::UNAUTHORIZED, Json(json!({ "error": "invalid signature" })))
        }
        Ok(Err(DispatchError::Payload(detail))) => {
            warn!(
                event_name = "ingress.webhook.payload_rejected",
                correlation_id = %correlation_id,
                error = %detail,
                "webhook body could not be decoded"
            );
            (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid payload" })))
        }
        Err(join_error) => {
            error!(
                event_name = "ingress.webhook.dispatch_failed",
                correlation_id = %correlation_id,
                error = %join_error,
                "webhook dispatch task failed"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "internal error" })))
        }
    }
}
