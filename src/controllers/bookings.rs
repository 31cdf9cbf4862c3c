use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    error::Error,
    middleware::AuthUser,
    services::{gateway::CustomerInfo, reconciliation::CreateBooking},
    AppState,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/bookings", post(create_booking).get(get_user_bookings))
        .route("/bookings/{id}", get(get_booking))
}

// POST /api/bookings
#[derive(Debug, Deserialize)]
struct CreateBookingRequest {
    slot: DateTime<Utc>,
    customer: CustomerInfo,
}

async fn create_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateBookingRequest>,
) -> Result<impl IntoResponse, Error> {
    let (booking, payment_session) = state
        .engine
        .create_booking(CreateBooking {
            user_id: user.user_id,
            slot: req.slot,
            customer: req.customer,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "booking": booking,
            "payment_session": payment_session,
        })),
    ))
}

// GET /api/bookings
async fn get_user_bookings(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, Error> {
    let bookings = state.store.bookings_for_user(user.user_id).await?;
    Ok(Json(json!({ "success": true, "bookings": bookings })))
}

// GET /api/bookings/{id}
async fn get_booking(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, Error> {
    let booking = state
        .store
        .booking(id)
        .await?
        .filter(|b| b.user_id == user.user_id)
        .ok_or_else(|| Error::NotFound(format!("booking {id} not found")))?;
    Ok(Json(json!({ "success": true, "booking": booking })))
}
