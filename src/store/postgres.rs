use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Booking, BookingEffect, BookingStatus, GatewayStatus, PaymentOrder, PaymentStatus};
use crate::store::{OrderUpdate, ReconciliationStore, TransitionResult};

/// Postgres-backed store. The compare-and-set lives in the SQL itself:
/// the transition UPDATE is conditional on the previous `gateway_status`,
/// and the `(user_id, slot)` race on creation is settled by a partial
/// unique index rather than a read-then-check.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }
}

type OrderRow = (
    String,
    Option<String>,
    i64,
    String,
    String,
    Option<String>,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
    DateTime<Utc>,
);

type BookingRow = (
    Uuid,
    Uuid,
    String,
    DateTime<Utc>,
    String,
    String,
    DateTime<Utc>,
    DateTime<Utc>,
);

fn order_from_row(row: OrderRow) -> Result<PaymentOrder> {
    let (order_id, session_id, amount, currency, status, payment_method, paid_at, created_at, updated_at) =
        row;
    let gateway_status = GatewayStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("unknown gateway_status '{status}' in store")))?;
    Ok(PaymentOrder {
        order_id,
        session_id,
        amount,
        currency,
        gateway_status,
        payment_method,
        paid_at,
        created_at,
        updated_at,
    })
}

fn booking_from_row(row: BookingRow) -> Result<Booking> {
    let (id, user_id, order_id, slot, status, payment_status, created_at, updated_at) = row;
    let status = BookingStatus::parse(&status)
        .ok_or_else(|| Error::Internal(format!("unknown booking status '{status}' in store")))?;
    let payment_status = PaymentStatus::parse(&payment_status).ok_or_else(|| {
        Error::Internal(format!("unknown payment_status '{payment_status}' in store"))
    })?;
    Ok(Booking {
        id,
        user_id,
        order_id,
        slot,
        status,
        payment_status,
        created_at,
        updated_at,
    })
}

const SELECT_ORDER: &str = "SELECT order_id, session_id, amount, currency, gateway_status, \
     payment_method, paid_at, created_at, updated_at FROM payment_orders WHERE order_id = $1";

const SELECT_BOOKING_BY_ORDER: &str = "SELECT id, user_id, order_id, slot, status, payment_status, \
     created_at, updated_at FROM bookings WHERE order_id = $1";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db)
            if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
    )
}

#[async_trait]
impl ReconciliationStore for PgStore {
    async fn insert_booking_with_order(
        &self,
        booking: &Booking,
        order: &PaymentOrder,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO payment_orders \
             (order_id, session_id, amount, currency, gateway_status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&order.order_id)
        .bind(order.session_id.as_deref())
        .bind(order.amount)
        .bind(&order.currency)
        .bind(order.gateway_status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            "INSERT INTO bookings \
             (id, user_id, order_id, slot, status, payment_status, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(booking.id)
        .bind(booking.user_id)
        .bind(&booking.order_id)
        .bind(booking.slot)
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {
                tx.commit().await?;
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                Err(Error::Conflict("slot is already booked".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_order_session(&self, order_id: &str, session_id: &str) -> Result<()> {
        let res = sqlx::query(
            "UPDATE payment_orders SET session_id = $1, updated_at = NOW() WHERE order_id = $2",
        )
        .bind(session_id)
        .bind(order_id)
        .execute(&self.pool)
        .await?;
        if res.rows_affected() == 0 {
            return Err(Error::NotFound(format!("payment order {order_id} not found")));
        }
        Ok(())
    }

    async fn rollback_creation(&self, order_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM bookings WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM payment_orders WHERE order_id = $1")
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn order(&self, order_id: &str) -> Result<Option<PaymentOrder>> {
        let row: Option<OrderRow> = sqlx::query_as(SELECT_ORDER)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(order_from_row).transpose()
    }

    async fn booking(&self, id: Uuid) -> Result<Option<Booking>> {
        let row: Option<BookingRow> = sqlx::query_as(
            "SELECT id, user_id, order_id, slot, status, payment_status, created_at, updated_at \
             FROM bookings WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(booking_from_row).transpose()
    }

    async fn booking_for_order(&self, order_id: &str) -> Result<Option<Booking>> {
        let row: Option<BookingRow> = sqlx::query_as(SELECT_BOOKING_BY_ORDER)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(booking_from_row).transpose()
    }

    async fn bookings_for_user(&self, user_id: Uuid) -> Result<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(
            "SELECT id, user_id, order_id, slot, status, payment_status, created_at, updated_at \
             FROM bookings WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(booking_from_row).collect()
    }

    async fn apply_transition(
        &self,
        order_id: &str,
        expected: GatewayStatus,
        update: &OrderUpdate,
        effect: BookingEffect,
    ) -> Result<TransitionResult> {
        let mut tx = self.pool.begin().await?;

        let res = sqlx::query(
            "UPDATE payment_orders SET gateway_status = $1, \
             payment_method = COALESCE($2, payment_method), \
             paid_at = COALESCE($3, paid_at), \
             updated_at = NOW() \
             WHERE order_id = $4 AND gateway_status = $5",
        )
        .bind(update.gateway_status.as_str())
        .bind(update.payment_method.as_deref())
        .bind(update.paid_at)
        .bind(order_id)
        .bind(expected.as_str())
        .execute(&mut *tx)
        .await?;

        if res.rows_affected() == 0 {
            tx.rollback().await?;
            let current: Option<String> =
                sqlx::query_scalar("SELECT gateway_status FROM payment_orders WHERE order_id = $1")
                    .bind(order_id)
                    .fetch_optional(&self.pool)
                    .await?;
            let current = current
                .ok_or_else(|| Error::NotFound(format!("payment order {order_id} not found")))?;
            let current = GatewayStatus::parse(&current).ok_or_else(|| {
                Error::Internal(format!("unknown gateway_status '{current}' in store"))
            })?;
            return Ok(TransitionResult::Raced { current });
        }

        match effect {
            BookingEffect::None => {}
            BookingEffect::Confirm => {
                sqlx::query(
                    "UPDATE bookings SET status = 'confirmed', payment_status = 'completed', \
                     updated_at = NOW() WHERE order_id = $1",
                )
                .bind(order_id)
                .execute(&mut *tx)
                .await?;
            }
            BookingEffect::MarkFailed => {
                sqlx::query(
                    "UPDATE bookings SET payment_status = 'failed', updated_at = NOW() \
                     WHERE order_id = $1",
                )
                .bind(order_id)
                .execute(&mut *tx)
                .await?;
            }
            BookingEffect::Cancel => {
                sqlx::query(
                    "UPDATE bookings SET status = 'cancelled', payment_status = 'failed', \
                     updated_at = NOW() WHERE order_id = $1",
                )
                .bind(order_id)
                .execute(&mut *tx)
                .await?;
            }
        }

        let order_row: OrderRow = sqlx::query_as(SELECT_ORDER)
            .bind(order_id)
            .fetch_one(&mut *tx)
            .await?;
        let booking_row: BookingRow = sqlx::query_as(SELECT_BOOKING_BY_ORDER)
            .bind(order_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(TransitionResult::Applied {
            order: order_from_row(order_row)?,
            booking: booking_from_row(booking_row)?,
        })
    }
}
