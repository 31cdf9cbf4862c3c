mod support;

use proptest::prelude::*;
use uuid::Uuid;

use consult_booking::error::Error;
use consult_booking::models::{BookingStatus, GatewayStatus};
use consult_booking::store::ReconciliationStore;

use support::*;

const ORDERS: usize = 3;

fn status_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "PENDING",
        "PAID",
        "FAILED",
        "CANCELLED",
        "EXPIRED",
        "USER_DROPPED",
        // Vocabulary the normalizer must refuse to apply.
        "REFUNDED",
        "AUTHORIZED",
        "garbage",
    ])
    .prop_map(String::from)
}

// (order index, reported status, source index)
fn event_strategy() -> impl Strategy<Value = (usize, String, usize)> {
    (0..ORDERS, status_strategy(), 0usize..3)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Invariant 2 after every event: a booking is confirmed if and only if
    // its payment order is PAID. Invariant 3: a terminal gateway status
    // never changes again, whatever later events report.
    #[test]
    fn random_event_sequences_keep_the_pair_coherent(
        events in prop::collection::vec(event_strategy(), 1..40)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let app = test_app();
            let mut order_ids = Vec::new();
            for _ in 0..ORDERS {
                let (_, session) = app
                    .engine
                    .create_booking(booking_request(Uuid::new_v4(), 1))
                    .await
                    .expect("creation must succeed");
                order_ids.push(session.order_id);
            }
            let mut frozen: Vec<Option<GatewayStatus>> = vec![None; ORDERS];

            for (idx, status, source) in events {
                let order_id = &order_ids[idx];
                let event = match source {
                    0 => client_event(order_id, &status),
                    1 => signed_webhook_event(order_id, &status),
                    _ => admin_event(order_id, &status),
                };
                if let Err(e) = app.engine.apply_status_event(event).await {
                    // The only legal failure here is a terminal-state conflict.
                    prop_assert!(matches!(e, Error::Conflict(_)), "unexpected error: {e}");
                }

                for (i, oid) in order_ids.iter().enumerate() {
                    let order = app.store.order(oid).await.unwrap().unwrap();
                    let booking = app.store.booking_for_order(oid).await.unwrap().unwrap();

                    prop_assert_eq!(
                        booking.status == BookingStatus::Confirmed,
                        order.gateway_status == GatewayStatus::Paid,
                        "confirmation coupling broken for order {}", oid
                    );

                    match frozen[i] {
                        Some(terminal) => prop_assert_eq!(
                            order.gateway_status, terminal,
                            "terminal status changed for order {}", oid
                        ),
                        None if order.gateway_status.is_terminal() => {
                            frozen[i] = Some(order.gateway_status);
                        }
                        None => {}
                    }
                }
            }
            Ok(())
        })?;
    }

    // Replaying a whole event sequence is a no-op: every event lands on the
    // idempotent, conflict or ignore path and nothing is written.
    #[test]
    fn replaying_a_sequence_changes_nothing(
        events in prop::collection::vec(event_strategy(), 1..25)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async move {
            let app = test_app();
            let mut order_ids = Vec::new();
            for _ in 0..ORDERS {
                let (_, session) = app
                    .engine
                    .create_booking(booking_request(Uuid::new_v4(), 1))
                    .await
                    .expect("creation must succeed");
                order_ids.push(session.order_id);
            }

            for (idx, status, _) in &events {
                let _ = app
                    .engine
                    .apply_status_event(client_event(&order_ids[*idx], status))
                    .await;
            }

            let mut snapshot = Vec::new();
            for oid in &order_ids {
                let order = app.store.order(oid).await.unwrap().unwrap();
                let booking = app.store.booking_for_order(oid).await.unwrap().unwrap();
                snapshot.push((
                    order.gateway_status,
                    order.updated_at,
                    booking.status,
                    booking.updated_at,
                ));
            }

            // Replay the identical sequence.
            for (idx, status, _) in &events {
                let _ = app
                    .engine
                    .apply_status_event(client_event(&order_ids[*idx], status))
                    .await;
            }

            for (oid, before) in order_ids.iter().zip(snapshot) {
                let order = app.store.order(oid).await.unwrap().unwrap();
                let booking = app.store.booking_for_order(oid).await.unwrap().unwrap();
                prop_assert_eq!(
                    (
                        order.gateway_status,
                        order.updated_at,
                        booking.status,
                        booking.updated_at
                    ),
                    before,
                    "replay must not write for order {}",
                    oid
                );
            }
            Ok(())
        })?;
    }
}
