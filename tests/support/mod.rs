#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use chrono::{Duration, Utc};
use uuid::Uuid;

use consult_booking::config::{
    AdminConfig, AppConfig, CircuitBreakerConfig, Config, ConsultationConfig, DatabaseConfig,
    GatewayConfig,
};
use consult_booking::controllers;
use consult_booking::error::{Error, Result};
use consult_booking::AppState;
use consult_booking::services::gateway::{
    constant_time_eq, sign_webhook, CallbackUrls, CreatedOrder, CustomerInfo, GatewayAdapter,
    NewOrder, VerifiedOrder,
};
use consult_booking::services::reconciliation::{
    CreateBooking, EngineSettings, EventSource, ReconciliationEngine, StatusEvent, WebhookEvidence,
};
use consult_booking::store::InMemoryStore;

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Scriptable gateway double. Records created orders, optionally fails
/// creation, and verifies webhook signatures with the same HMAC scheme as
/// the production client.
pub struct StubGateway {
    pub created: Mutex<Vec<String>>,
    pub fail_create: AtomicBool,
    pub verify_result: Mutex<Option<VerifiedOrder>>,
}

impl Default for StubGateway {
    fn default() -> Self {
        StubGateway {
            created: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            verify_result: Mutex::new(None),
        }
    }
}

impl StubGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn set_verify_result(&self, verified: VerifiedOrder) {
        *self.verify_result.lock().unwrap() = Some(verified);
    }
}

#[async_trait]
impl GatewayAdapter for StubGateway {
    async fn create_order(&self, order: NewOrder<'_>) -> Result<CreatedOrder> {
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return Err(Error::GatewayUnavailable("stub gateway down".to_string()));
        }
        self.created
            .lock()
            .unwrap()
            .push(order.order_id.to_string());
        Ok(CreatedOrder {
            session_id: format!("sess-{}", order.order_id),
            initial_status: "ACTIVE".to_string(),
        })
    }

    async fn verify_order(&self, order_id: &str) -> Result<VerifiedOrder> {
        self.verify_result
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::NotFound(format!("order {order_id} not found at gateway")))
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        constant_time_eq(&sign_webhook(WEBHOOK_SECRET, payload), signature)
    }
}

pub struct TestApp {
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<StubGateway>,
    pub engine: Arc<ReconciliationEngine>,
}

pub fn test_app() -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    let gateway = Arc::new(StubGateway::new());
    let engine = Arc::new(ReconciliationEngine::new(
        store.clone(),
        gateway.clone(),
        EngineSettings {
            amount_minor: 50_00,
            currency: "EUR".to_string(),
            callbacks: CallbackUrls {
                success_url: "https://example.com/payment/success".to_string(),
                fail_url: "https://example.com/payment/fail".to_string(),
                webhook_url: "https://example.com/api/webhooks/payment".to_string(),
            },
        },
    ));
    TestApp {
        store,
        gateway,
        engine,
    }
}

fn test_config() -> Config {
    Config {
        app: AppConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            environment: "test".to_string(),
            rust_log: "info".to_string(),
        },
        database: DatabaseConfig {
            url: "postgres://localhost/unused".to_string(),
            pool_size: 1,
            acquire_timeout_seconds: 5,
        },
        gateway: GatewayConfig {
            merchant_id: "merchant-1".to_string(),
            merchant_password: "hunter2".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            base_url: "https://gateway.invalid".to_string(),
            success_url: "https://example.com/payment/success".to_string(),
            fail_url: "https://example.com/payment/fail".to_string(),
            webhook_url: "https://example.com/api/webhooks/payment".to_string(),
            timeout_seconds: 5,
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 5,
            timeout_seconds: 60,
        },
        consultation: ConsultationConfig {
            price_minor: 50_00,
            currency: "EUR".to_string(),
        },
        admin: AdminConfig {
            api_token: ADMIN_TOKEN.to_string(),
        },
    }
}

/// The API router wired to the given test app, as `main` assembles it minus
/// the database.
pub fn test_router(app: &TestApp) -> Router {
    let state = Arc::new(AppState {
        config: test_config(),
        store: app.store.clone(),
        gateway: app.gateway.clone(),
        engine: app.engine.clone(),
    });
    controllers::routes().with_state(state)
}

pub fn customer() -> CustomerInfo {
    CustomerInfo {
        name: "Ada Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        phone: None,
    }
}

pub fn booking_request(user_id: Uuid, hours_ahead: i64) -> CreateBooking {
    CreateBooking {
        user_id,
        slot: Utc::now() + Duration::hours(hours_ahead),
        customer: customer(),
    }
}

pub fn webhook_payload(order_id: &str, status: &str) -> Vec<u8> {
    serde_json::json!({ "orderId": order_id, "status": status })
        .to_string()
        .into_bytes()
}

/// A webhook event signed with the shared test secret.
pub fn signed_webhook_event(order_id: &str, status: &str) -> StatusEvent {
    let payload = webhook_payload(order_id, status);
    let signature = sign_webhook(WEBHOOK_SECRET, &payload);
    StatusEvent {
        order_id: order_id.to_string(),
        reported_status: status.to_string(),
        source: EventSource::Webhook,
        evidence: Some(WebhookEvidence { payload, signature }),
        payment_method: None,
        paid_at: None,
    }
}

/// A webhook event carrying a signature produced with the wrong secret.
pub fn forged_webhook_event(order_id: &str, status: &str) -> StatusEvent {
    let payload = webhook_payload(order_id, status);
    let signature = sign_webhook("not-the-secret", &payload);
    StatusEvent {
        order_id: order_id.to_string(),
        reported_status: status.to_string(),
        source: EventSource::Webhook,
        evidence: Some(WebhookEvidence { payload, signature }),
        payment_method: None,
        paid_at: None,
    }
}

pub fn client_event(order_id: &str, status: &str) -> StatusEvent {
    StatusEvent {
        order_id: order_id.to_string(),
        reported_status: status.to_string(),
        source: EventSource::Client,
        evidence: None,
        payment_method: None,
        paid_at: None,
    }
}

pub fn admin_event(order_id: &str, status: &str) -> StatusEvent {
    StatusEvent {
        order_id: order_id.to_string(),
        reported_status: status.to_string(),
        source: EventSource::Admin,
        evidence: None,
        payment_method: None,
        paid_at: None,
    }
}
