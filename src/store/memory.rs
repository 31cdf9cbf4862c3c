use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Booking, BookingEffect, BookingStatus, GatewayStatus, PaymentOrder, PaymentStatus};
use crate::store::{OrderUpdate, ReconciliationStore, TransitionResult};

#[derive(Default)]
struct Inner {
    orders: HashMap<String, PaymentOrder>,
    bookings: HashMap<Uuid, Booking>,
    booking_by_order: HashMap<String, Uuid>,
}

/// In-memory store. One mutex over both maps makes every trait operation a
/// single atomic unit, which is exactly the contract the engine needs.
/// Used in tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn apply_effect(booking: &mut Booking, effect: BookingEffect) {
    match effect {
        BookingEffect::None => return,
        BookingEffect::Confirm => {
            booking.status = BookingStatus::Confirmed;
            booking.payment_status = PaymentStatus::Completed;
        }
        BookingEffect::MarkFailed => {
            booking.payment_status = PaymentStatus::Failed;
        }
        BookingEffect::Cancel => {
            booking.status = BookingStatus::Cancelled;
            booking.payment_status = PaymentStatus::Failed;
        }
    }
    booking.updated_at = Utc::now();
}

#[async_trait]
impl ReconciliationStore for InMemoryStore {
    async fn insert_booking_with_order(
        &self,
        booking: &Booking,
        order: &PaymentOrder,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let taken = inner.bookings.values().any(|b| {
            b.user_id == booking.user_id
                && b.slot == booking.slot
                && b.status != BookingStatus::Cancelled
        });
        if taken {
            return Err(Error::Conflict("slot is already booked".to_string()));
        }
        inner.orders.insert(order.order_id.clone(), order.clone());
        inner.bookings.insert(booking.id, booking.clone());
        inner
            .booking_by_order
            .insert(booking.order_id.clone(), booking.id);
        Ok(())
    }

    async fn set_order_session(&self, order_id: &str, session_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let order = inner
            .orders
            .get_mut(order_id)
            .ok_or_else(|| Error::NotFound(format!("payment order {order_id} not found")))?;
        order.session_id = Some(session_id.to_string());
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn rollback_creation(&self, order_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.orders.remove(order_id);
        if let Some(booking_id) = inner.booking_by_order.remove(order_id) {
            inner.bookings.remove(&booking_id);
        }
        Ok(())
    }

    async fn order(&self, order_id: &str) -> Result<Option<PaymentOrder>> {
        let inner = self.inner.lock().await;
        Ok(inner.orders.get(order_id).cloned())
    }

    async fn booking(&self, id: Uuid) -> Result<Option<Booking>> {
        let inner = self.inner.lock().await;
        Ok(inner.bookings.get(&id).cloned())
    }

    async fn booking_for_order(&self, order_id: &str) -> Result<Option<Booking>> {
        let inner = self.inner.lock().await;
        let id = match inner.booking_by_order.get(order_id) {
            Some(id) => *id,
            None => return Ok(None),
        };
        Ok(inner.bookings.get(&id).cloned())
    }

    async fn bookings_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>> {
        let inner = self.inner.lock().await;
        let mut bookings: Vec<Booking> = inner
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn apply_transition(
        &self,
        order_id: &str,
        expected: GatewayStatus,
        update: &OrderUpdate,
        effect: BookingEffect,
    ) -> Result<TransitionResult> {
        let mut inner = self.inner.lock().await;

        let order = inner
            .orders
            .get_mut(order_id)
            .ok_or_else(|| Error::NotFound(format!("payment order {order_id} not found")))?;
        if order.gateway_status != expected {
            let current = order.gateway_status;
            return Ok(TransitionResult::Raced { current });
        }

        order.gateway_status = update.gateway_status;
        if update.payment_method.is_some() {
            order.payment_method = update.payment_method.clone();
        }
        if update.paid_at.is_some() {
            order.paid_at = update.paid_at;
        }
        order.updated_at = Utc::now();
        let order = order.clone();

        let booking_id = *inner
            .booking_by_order
            .get(order_id)
            .ok_or_else(|| Error::Internal(format!("order {order_id} has no booking")))?;
        let booking = inner
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| Error::Internal(format!("booking {booking_id} missing")))?;
        apply_effect(booking, effect);
        let booking = booking.clone();

        Ok(TransitionResult::Applied { order, booking })
    }
}
