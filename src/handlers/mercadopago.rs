use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::{services::mercadopago::verify_webhook_signature, AppState};

// POST /api/v1/mercadopago/webhook
//
// Response contract: 401 only for signature rejection; every other outcome is
// acknowledged with 200 so the gateway does not retry-storm on non-transient
// failures. Recovery of a genuinely missed update relies on the gateway's own
// redelivery.
#[utoipa::path(
    post,
    path = "/api/v1/mercadopago/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Delivery accepted or absorbed"),
        (status = 401, description = "Invalid signature")
    ),
    tag = "Payments"
)]
pub async fn mercadopago_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let json: Value = match serde_json::from_slice(&body) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "webhook payload is not valid JSON; absorbing");
            return (StatusCode::OK, Json(json!({"error": "Internal error"})));
        }
    };

    // data.id arrives as a string or a number depending on the event source.
    let payment_id = match json.get("data").and_then(|d| d.get("id")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    // Authenticity check precedes all processing.
    let secret = state.config.mercadopago_webhook_secret.as_deref();
    if !verify_webhook_signature(&headers, &payment_id, secret) {
        warn!(payment_id, "webhook signature verification failed");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "Invalid signature"})),
        );
    }

    let event_type = json.get("type").and_then(|v| v.as_str()).unwrap_or("");
    if event_type != "payment" {
        info!(event_type, "ignoring non-payment webhook event");
        return (StatusCode::OK, Json(json!({"received": true})));
    }

    if payment_id.is_empty() {
        warn!("payment webhook without data.id; absorbing");
        return (StatusCode::OK, Json(json!({"received": true})));
    }

    match state
        .reconciliation_service
        .process_payment_event(&payment_id)
        .await
    {
        Ok(outcome) => {
            info!(payment_id, ?outcome, "webhook processed");
            (StatusCode::OK, Json(json!({"received": true})))
        }
        Err(e) => {
            // Deliberate 200 on internal failure; see response contract above.
            error!(payment_id, error = %e, "webhook processing failed; acking anyway");
            (StatusCode::OK, Json(json!({"error": "Internal error"})))
        }
    }
}

// GET /api/v1/mercadopago/webhook
//
// Used by the gateway to verify the webhook URL; carries no state-machine
// logic.
#[utoipa::path(
    get,
    path = "/api/v1/mercadopago/webhook",
    responses((status = 200, description = "Webhook endpoint is reachable")),
    tag = "Payments"
)]
pub async fn mercadopago_webhook_probe() -> impl IntoResponse {
    Json(json!({
        "message": "MercadoPago webhook endpoint",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
