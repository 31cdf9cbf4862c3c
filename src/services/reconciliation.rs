//! Booking–payment reconciliation engine.
//!
//! All three event sources (client verify-poll, gateway webhook, admin
//! override) funnel into [`ReconciliationEngine::apply_status_event`], the
//! single place where a reported gateway status becomes a state transition.
//! The engine never talks to the network inside the atomic section: the
//! gateway call during creation happens before the store write, and status
//! events carry their evidence with them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Booking, BookingStatus, GatewayStatus, PaymentOrder};
use crate::services::gateway::{CallbackUrls, CustomerInfo, GatewayAdapter, NewOrder};
use crate::store::{OrderUpdate, ReconciliationStore, TransitionResult};

/// Where a status event came from. Webhook events must carry signature
/// evidence; the other sources are authenticated upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Client,
    Webhook,
    Admin,
}

impl EventSource {
    pub fn as_str(self) -> &'static str {
        match self {
            EventSource::Client => "client",
            EventSource::Webhook => "webhook",
            EventSource::Admin => "admin",
        }
    }
}

/// Raw webhook material, passed verbatim so verification is bit-exact
/// against what the gateway signed.
#[derive(Debug, Clone)]
pub struct WebhookEvidence {
    pub payload: Vec<u8>,
    pub signature: String,
}

/// One reported status from any source, as handed to the engine.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub order_id: String,
    pub reported_status: String,
    pub source: EventSource,
    pub evidence: Option<WebhookEvidence>,
    pub payment_method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// The transition was committed.
    Applied,
    /// Idempotent replay of the current status, nothing written.
    AlreadyApplied,
    /// Unrecognized status value, intentionally not applied.
    Ignored,
}

impl EventOutcome {
    fn as_str(self) -> &'static str {
        match self {
            EventOutcome::Applied => "applied",
            EventOutcome::AlreadyApplied => "already_applied",
            EventOutcome::Ignored => "ignored",
        }
    }
}

/// Post-event state of the pair.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEventResult {
    pub outcome: EventOutcome,
    pub gateway_status: GatewayStatus,
    pub booking_status: BookingStatus,
}

/// Pricing and callback settings for new orders, fixed per deployment.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub amount_minor: i64,
    pub currency: String,
    pub callbacks: CallbackUrls,
}

/// A reservation request as accepted from the routing layer.
#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub user_id: Uuid,
    pub slot: DateTime<Utc>,
    pub customer: CustomerInfo,
}

/// Gateway session handed back to the client so it can start the payment.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentSession {
    pub order_id: String,
    pub session_id: String,
    pub amount: i64,
    pub currency: String,
}

pub struct ReconciliationEngine {
    store: Arc<dyn ReconciliationStore>,
    gateway: Arc<dyn GatewayAdapter>,
    settings: EngineSettings,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn ReconciliationStore>,
        gateway: Arc<dyn GatewayAdapter>,
        settings: EngineSettings,
    ) -> Self {
        ReconciliationEngine {
            store,
            gateway,
            settings,
        }
    }

    /// Opens a booking and its payment order, then creates the remote
    /// gateway order. If the gateway refuses or is unreachable, both records
    /// are rolled back: a booking must never exist without a valid payment
    /// attempt.
    pub async fn create_booking(&self, req: CreateBooking) -> Result<(Booking, PaymentSession)> {
        if req.slot <= Utc::now() {
            return Err(Error::Validation("slot must be in the future".to_string()));
        }

        let order_id = format!("ord-{}", Uuid::new_v4().simple());
        let booking = Booking::new(req.user_id, req.slot, order_id.clone());
        let order = PaymentOrder::new(
            order_id.clone(),
            self.settings.amount_minor,
            self.settings.currency.clone(),
        );

        // The uniqueness constraint in the store settles concurrent requests
        // for the same (user, slot); the loser gets Conflict here.
        self.store.insert_booking_with_order(&booking, &order).await?;

        let created = match self
            .gateway
            .create_order(NewOrder {
                order_id: &order_id,
                amount: order.amount,
                currency: &order.currency,
                customer: &req.customer,
                urls: &self.settings.callbacks,
            })
            .await
        {
            Ok(created) => created,
            Err(gateway_err) => {
                if let Err(e) = self.store.rollback_creation(&order_id).await {
                    error!(order_id = %order_id, "rollback after gateway failure failed: {e}");
                }
                return Err(gateway_err);
            }
        };

        self.store
            .set_order_session(&order_id, &created.session_id)
            .await?;
        info!(
            order_id = %order_id,
            booking_id = %booking.id,
            "booking created, awaiting payment"
        );

        Ok((
            booking,
            PaymentSession {
                order_id,
                session_id: created.session_id,
                amount: order.amount,
                currency: order.currency,
            },
        ))
    }

    /// Merges one externally reported status into the booking/payment-order
    /// pair.
    ///
    /// Webhook evidence is verified before anything is read. An unrecognized
    /// status is a logged no-op. A terminal order accepts only identical
    /// replays; anything else is `Conflict`. Non-terminal transitions are
    /// compare-and-set on the previous status, so of two concurrent callers
    /// exactly one commits and the loser re-evaluates the committed state.
    pub async fn apply_status_event(&self, event: StatusEvent) -> Result<StatusEventResult> {
        let order_id = event.order_id.as_str();
        let reported = event.reported_status.as_str();

        if event.source == EventSource::Webhook {
            let verified = event
                .evidence
                .as_ref()
                .map(|e| self.gateway.verify_webhook_signature(&e.payload, &e.signature))
                .unwrap_or(false);
            if !verified {
                self.audit(order_id, event.source, reported, "unauthorized");
                return Err(Error::Unauthorized(
                    "webhook signature verification failed".to_string(),
                ));
            }
        }

        let Some(new_status) = GatewayStatus::normalize(reported) else {
            // Unrecognized signal: intentionally ignored, not an error.
            let (order, booking) = self.current_pair(order_id).await?;
            self.audit(order_id, event.source, reported, "ignored");
            return Ok(StatusEventResult {
                outcome: EventOutcome::Ignored,
                gateway_status: order.gateway_status,
                booking_status: booking.status,
            });
        };

        loop {
            let (order, booking) = self.current_pair(order_id).await?;
            let current = order.gateway_status;

            if current == new_status {
                self.audit(order_id, event.source, reported, "already_applied");
                return Ok(StatusEventResult {
                    outcome: EventOutcome::AlreadyApplied,
                    gateway_status: current,
                    booking_status: booking.status,
                });
            }
            if current.is_terminal() {
                self.audit(order_id, event.source, reported, "conflict");
                return Err(Error::Conflict(format!(
                    "payment order {order_id} is already {}, refusing {}",
                    current.as_str(),
                    new_status.as_str()
                )));
            }

            // paymentMethod/paidAt are only recorded on the PAID transition.
            let update = if new_status == GatewayStatus::Paid {
                OrderUpdate {
                    gateway_status: new_status,
                    payment_method: event.payment_method.clone(),
                    paid_at: Some(event.paid_at.unwrap_or_else(Utc::now)),
                }
            } else {
                OrderUpdate {
                    gateway_status: new_status,
                    payment_method: None,
                    paid_at: None,
                }
            };

            match self
                .store
                .apply_transition(order_id, current, &update, new_status.booking_effect())
                .await?
            {
                TransitionResult::Applied { order, booking } => {
                    self.audit(order_id, event.source, reported, EventOutcome::Applied.as_str());
                    return Ok(StatusEventResult {
                        outcome: EventOutcome::Applied,
                        gateway_status: order.gateway_status,
                        booking_status: booking.status,
                    });
                }
                // Lost the race: re-read and take the idempotent/conflict path.
                TransitionResult::Raced { .. } => continue,
            }
        }
    }

    async fn current_pair(&self, order_id: &str) -> Result<(PaymentOrder, Booking)> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("payment order {order_id} not found")))?;
        let booking = self
            .store
            .booking_for_order(order_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("payment order {order_id} has no booking")))?;
        Ok((order, booking))
    }

    /// Audit record for every applied or rejected event, consumed by
    /// external logging.
    fn audit(&self, order_id: &str, source: EventSource, reported_status: &str, outcome: &str) {
        match outcome {
            "conflict" | "unauthorized" => warn!(
                order_id,
                source = source.as_str(),
                reported_status,
                outcome,
                "payment status event rejected"
            ),
            _ => info!(
                order_id,
                source = source.as_str(),
                reported_status,
                outcome,
                "payment status event"
            ),
        }
    }
}
