use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized gateway status. This is the only vocabulary the transition
/// logic ever sees; raw gateway strings are mapped here by [`GatewayStatus::normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    Expired,
    UserDropped,
}

impl GatewayStatus {
    /// Maps a raw gateway-reported status to the internal enum.
    ///
    /// The table is closed: anything not listed is non-authoritative and is
    /// never applied to a record. New gateway vocabulary is added here and
    /// nowhere else.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "ACTIVE" | "NEW" => Some(GatewayStatus::Pending),
            "PAID" => Some(GatewayStatus::Paid),
            "FAILED" => Some(GatewayStatus::Failed),
            "CANCELLED" => Some(GatewayStatus::Cancelled),
            "EXPIRED" => Some(GatewayStatus::Expired),
            "USER_DROPPED" => Some(GatewayStatus::UserDropped),
            _ => None,
        }
    }

    /// Terminal statuses freeze the payment order: a later event reporting a
    /// different value is a conflict, not an update. `USER_DROPPED` is
    /// terminal because it cancels the booking, and a cancelled booking may
    /// never be revived.
    pub fn is_terminal(self) -> bool {
        !matches!(self, GatewayStatus::Pending)
    }

    /// The booking-side mutation derived from a transition into `self`.
    pub fn booking_effect(self) -> BookingEffect {
        match self {
            GatewayStatus::Pending => BookingEffect::None,
            GatewayStatus::Paid => BookingEffect::Confirm,
            // Failed leaves the booking pending so the user can retry.
            GatewayStatus::Failed => BookingEffect::MarkFailed,
            GatewayStatus::Cancelled | GatewayStatus::Expired | GatewayStatus::UserDropped => {
                BookingEffect::Cancel
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GatewayStatus::Pending => "PENDING",
            GatewayStatus::Paid => "PAID",
            GatewayStatus::Failed => "FAILED",
            GatewayStatus::Cancelled => "CANCELLED",
            GatewayStatus::Expired => "EXPIRED",
            GatewayStatus::UserDropped => "USER_DROPPED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(GatewayStatus::Pending),
            "PAID" => Some(GatewayStatus::Paid),
            "FAILED" => Some(GatewayStatus::Failed),
            "CANCELLED" => Some(GatewayStatus::Cancelled),
            "EXPIRED" => Some(GatewayStatus::Expired),
            "USER_DROPPED" => Some(GatewayStatus::UserDropped),
            _ => None,
        }
    }
}

/// What a gateway-status transition does to the owning booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingEffect {
    /// No booking mutation.
    None,
    /// status = confirmed, payment_status = completed.
    Confirm,
    /// payment_status = failed, status stays pending (retry is possible).
    MarkFailed,
    /// status = cancelled, payment_status = failed.
    Cancel,
}

/// One payment attempt against the gateway, keyed by the gateway-facing
/// `order_id`. Amount and currency are fixed at creation.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOrder {
    pub order_id: String,
    pub session_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub gateway_status: GatewayStatus,
    pub payment_method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentOrder {
    pub fn new(order_id: String, amount: i64, currency: String) -> Self {
        let now = Utc::now();
        PaymentOrder {
            order_id,
            session_id: None,
            amount,
            currency,
            gateway_status: GatewayStatus::Pending,
            payment_method: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
