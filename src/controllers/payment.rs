use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::{
    error::Error,
    middleware::{AdminAuth, AuthUser},
    services::reconciliation::{EventSource, StatusEvent, WebhookEvidence},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments/{order_id}/verify", post(verify_payment))
        .route("/webhooks/payment", post(payment_webhook))
        .route("/admin/payments/{order_id}/override", post(admin_override))
}

// POST /api/payments/{order_id}/verify
//
// Client poll: asks the gateway for the current order status and feeds the
// answer through the reconciliation engine.
async fn verify_payment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let booking = state
        .store
        .booking_for_order(&order_id)
        .await?
        .filter(|b| b.user_id == user.user_id)
        .ok_or_else(|| Error::NotFound(format!("order {order_id} not found")))?;

    let verified = state.gateway.verify_order(&order_id).await?;
    let result = state
        .engine
        .apply_status_event(StatusEvent {
            order_id: order_id.clone(),
            reported_status: verified.gateway_status,
            source: EventSource::Client,
            evidence: None,
            payment_method: verified.payment_method,
            paid_at: verified.paid_at,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "order_id": order_id,
        "booking_id": booking.id,
        "outcome": result.outcome,
        "gateway_status": result.gateway_status,
        "booking_status": result.booking_status,
    })))
}

// POST /api/webhooks/payment
//
// The raw body bytes and the signature header are passed to the engine
// verbatim so signature verification is bit-exact against what the gateway
// signed.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(rename = "orderId")]
    order_id: String,
    status: String,
    #[serde(rename = "paymentMethod")]
    payment_method: Option<String>,
    #[serde(rename = "paidAt")]
    paid_at: Option<DateTime<Utc>>,
}

async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, Error> {
    let signature = headers
        .get("x-gateway-signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| Error::Validation(format!("malformed webhook payload: {e}")))?;

    let event = StatusEvent {
        order_id: payload.order_id,
        reported_status: payload.status,
        source: EventSource::Webhook,
        evidence: Some(WebhookEvidence {
            payload: body.to_vec(),
            signature,
        }),
        payment_method: payload.payment_method,
        paid_at: payload.paid_at,
    };

    match state.engine.apply_status_event(event).await {
        Ok(result) => Ok(Json(json!({ "received": true, "outcome": result.outcome }))),
        // Discarded events are already audited by the engine. Ack them so the
        // gateway stops retrying an event that can never be applied.
        Err(Error::Unauthorized(_)) | Err(Error::Conflict(_)) | Err(Error::NotFound(_)) => {
            Ok(Json(json!({ "received": true })))
        }
        Err(e) => Err(e),
    }
}

// POST /api/admin/payments/{order_id}/override
#[derive(Debug, Deserialize)]
struct OverrideRequest {
    status: String,
}

async fn admin_override(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(order_id): Path<String>,
    Json(req): Json<OverrideRequest>,
) -> Result<impl IntoResponse, Error> {
    let result = state
        .engine
        .apply_status_event(StatusEvent {
            order_id: order_id.clone(),
            reported_status: req.status,
            source: EventSource::Admin,
            evidence: None,
            payment_method: None,
            paid_at: None,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "order_id": order_id,
        "outcome": result.outcome,
        "gateway_status": result.gateway_status,
        "booking_status": result.booking_status,
    })))
}
