pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Booking, BookingEffect, GatewayStatus, PaymentOrder};

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Field updates written to a payment order on an accepted transition.
/// `payment_method` and `paid_at` are only populated on a transition into PAID.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub gateway_status: GatewayStatus,
    pub payment_method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Result of the compare-and-set transition attempt.
#[derive(Debug, Clone)]
pub enum TransitionResult {
    /// The transition committed; both records reflect the new state.
    Applied {
        order: PaymentOrder,
        booking: Booking,
    },
    /// Another caller committed first. `current` is the status they wrote;
    /// the caller re-evaluates against it.
    Raced { current: GatewayStatus },
}

/// Atomic read-modify-write storage for the booking/payment-order pair,
/// keyed by the gateway-facing order id.
///
/// The payment order row is the single synchronization point: `apply_transition`
/// is a compare-and-set on the previous `gateway_status`, and
/// `insert_booking_with_order` enforces the `(user_id, slot)` uniqueness
/// constraint so concurrent creation races have exactly one winner.
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// Inserts a booking and its payment order in one atomic unit.
    /// Fails with `Conflict` when a non-cancelled booking already holds the
    /// same `(user_id, slot)`.
    async fn insert_booking_with_order(
        &self,
        booking: &Booking,
        order: &PaymentOrder,
    ) -> Result<()>;

    /// Records the gateway session token once remote order creation succeeds.
    async fn set_order_session(&self, order_id: &str, session_id: &str) -> Result<()>;

    /// Deletes both records of a creation attempt whose remote order could
    /// not be created. A booking must never outlive its payment attempt.
    async fn rollback_creation(&self, order_id: &str) -> Result<()>;

    async fn order(&self, order_id: &str) -> Result<Option<PaymentOrder>>;

    async fn booking(&self, id: Uuid) -> Result<Option<Booking>>;

    async fn booking_for_order(&self, order_id: &str) -> Result<Option<Booking>>;

    async fn bookings_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>>;

    /// Compare-and-set transition: writes `update` to the payment order and
    /// applies `effect` to the booking in one atomic unit, but only if the
    /// order's `gateway_status` still equals `expected`. Advances both
    /// `updated_at` columns.
    async fn apply_transition(
        &self,
        order_id: &str,
        expected: GatewayStatus,
        update: &OrderUpdate,
        effect: BookingEffect,
    ) -> Result<TransitionResult>;
}
