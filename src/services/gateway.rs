//! Payment gateway adapter.
//!
//! [`GatewayAdapter`] is the contract the reconciliation engine depends on:
//! create a remote order once per booking, query its status, and verify
//! webhook signatures. [`HttpGatewayClient`] is the production
//! implementation; all network calls go through a circuit breaker so a dead
//! gateway does not get hammered with requests.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::{CircuitBreakerConfig, GatewayConfig};
use crate::error::{Error, Result};

/// Customer details forwarded to the gateway when creating an order.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomerInfo {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Redirect/notification URLs the gateway calls back on.
#[derive(Debug, Clone)]
pub struct CallbackUrls {
    pub success_url: String,
    pub fail_url: String,
    pub webhook_url: String,
}

/// Everything the gateway needs to create one remote order.
#[derive(Debug)]
pub struct NewOrder<'a> {
    pub order_id: &'a str,
    pub amount: i64,
    pub currency: &'a str,
    pub customer: &'a CustomerInfo,
    pub urls: &'a CallbackUrls,
}

#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub session_id: String,
    pub initial_status: String,
}

/// Raw status report from the gateway. The engine normalizes `gateway_status`;
/// this type never carries internal vocabulary.
#[derive(Debug, Clone)]
pub struct VerifiedOrder {
    pub gateway_status: String,
    pub payment_method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Contract between the engine and the payment provider.
///
/// `create_order` is called exactly once per booking. Errors carry the retry
/// contract: `GatewayUnavailable` for network/5xx (retryable),
/// `GatewayRejected` for validation refusals (permanent), `NotFound` for an
/// unknown order on verification.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    async fn create_order(&self, order: NewOrder<'_>) -> Result<CreatedOrder>;

    async fn verify_order(&self, order_id: &str) -> Result<VerifiedOrder>;

    /// Pure verification of a webhook payload against its signature header.
    /// No network call; must compare in constant time.
    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;
}

/// HMAC-SHA256 of the raw payload bytes, hex-encoded. This is the signature
/// the gateway puts in the webhook header.
pub fn sign_webhook(secret: &str, payload: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("hmac accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison. The exit time must not depend on where
/// the first mismatching byte sits.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

// --- Circuit breaker ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests allowed.
    Closed,
    /// Too many consecutive failures, requests blocked until the timeout.
    Open,
    /// One probe request allowed to test whether the gateway recovered.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
}

/// Guards access to the gateway API. After `failure_threshold` consecutive
/// failures the breaker opens and blocks requests for `timeout`; the first
/// request after the timeout is a probe that closes or re-opens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        CircuitBreaker {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
            }),
            failure_threshold,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let timed_out = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= self.timeout);
                if timed_out {
                    inner.state = CircuitState::HalfOpen;
                    info!("circuit breaker transitioning to half-open");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::HalfOpen {
            info!("circuit breaker recovered, closing");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures += 1;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed if inner.failures >= self.failure_threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    failures = inner.failures,
                    "circuit breaker opened, blocking gateway requests"
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!("circuit breaker probe failed, re-opening");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }
}

// --- Wire types for the gateway API ---

#[derive(Debug, Serialize)]
struct CustomerWire<'a> {
    name: &'a str,
    email: &'a str,
    phone: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct OrderInitRequest<'a> {
    #[serde(rename = "merchantId")]
    merchant_id: &'a str,
    token: String,
    #[serde(rename = "orderId")]
    order_id: &'a str,
    amount: i64,
    currency: &'a str,
    customer: CustomerWire<'a>,
    #[serde(rename = "successUrl")]
    success_url: &'a str,
    #[serde(rename = "failUrl")]
    fail_url: &'a str,
    #[serde(rename = "notificationUrl")]
    notification_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderInitResponse {
    success: bool,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    status: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct OrderStatusRequest<'a> {
    #[serde(rename = "merchantId")]
    merchant_id: &'a str,
    token: String,
    #[serde(rename = "orderId")]
    order_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderStatusResponse {
    success: bool,
    status: Option<String>,
    #[serde(rename = "paymentMethod")]
    payment_method: Option<String>,
    #[serde(rename = "paidAt")]
    paid_at: Option<DateTime<Utc>>,
    message: Option<String>,
}

/// HTTP client for the payment gateway API.
pub struct HttpGatewayClient {
    merchant_id: String,
    merchant_password: String,
    webhook_secret: String,
    base_url: String,
    http: reqwest::Client,
    breaker: CircuitBreaker,
}

impl HttpGatewayClient {
    pub fn from_config(gateway: &GatewayConfig, breaker: &CircuitBreakerConfig) -> Self {
        HttpGatewayClient {
            merchant_id: gateway.merchant_id.clone(),
            merchant_password: gateway.merchant_password.clone(),
            webhook_secret: gateway.webhook_secret.clone(),
            base_url: gateway.base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(gateway.timeout_seconds))
                .build()
                .expect("failed to build HTTP client"),
            breaker: CircuitBreaker::new(breaker.failure_threshold, breaker.timeout_seconds),
        }
    }

    /// Request token for order creation, tying amount and order id to the
    /// merchant credentials.
    fn order_token(&self, amount: i64, currency: &str, order_id: &str) -> String {
        let material = format!(
            "{}{}{}{}{}",
            amount, currency, order_id, self.merchant_password, self.merchant_id
        );
        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Request token for status queries.
    fn status_token(&self, order_id: &str) -> String {
        let material = format!("{}{}{}", order_id, self.merchant_password, self.merchant_id);
        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Sends one POST through the circuit breaker. Network errors, timeouts
    /// and 5xx responses count as failures and surface as `GatewayUnavailable`.
    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        if !self.breaker.can_execute() {
            warn!("circuit breaker is open, blocking gateway request");
            return Err(Error::GatewayUnavailable(
                "circuit breaker is open".to_string(),
            ));
        }
        let url = format!("{}{}", self.base_url, path);
        match self.http.post(&url).json(body).send().await {
            Ok(resp) if resp.status().is_server_error() => {
                self.breaker.record_failure();
                Err(Error::GatewayUnavailable(format!(
                    "gateway returned {}",
                    resp.status()
                )))
            }
            Ok(resp) => {
                self.breaker.record_success();
                Ok(resp)
            }
            Err(e) => {
                self.breaker.record_failure();
                Err(Error::GatewayUnavailable(e.to_string()))
            }
        }
    }
}

#[async_trait]
impl GatewayAdapter for HttpGatewayClient {
    async fn create_order(&self, order: NewOrder<'_>) -> Result<CreatedOrder> {
        let token = self.order_token(order.amount, order.currency, order.order_id);
        let request = OrderInitRequest {
            merchant_id: &self.merchant_id,
            token,
            order_id: order.order_id,
            amount: order.amount,
            currency: order.currency,
            customer: CustomerWire {
                name: &order.customer.name,
                email: &order.customer.email,
                phone: order.customer.phone.as_deref(),
            },
            success_url: &order.urls.success_url,
            fail_url: &order.urls.fail_url,
            notification_url: &order.urls.webhook_url,
        };

        info!(order_id = order.order_id, amount = order.amount, "creating gateway order");
        let resp = self.post_json("/orders/init", &request).await?;

        if resp.status().is_client_error() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::GatewayRejected(message));
        }
        let body: OrderInitResponse = resp
            .json()
            .await
            .map_err(|e| Error::GatewayUnavailable(format!("malformed gateway response: {e}")))?;
        if !body.success {
            return Err(Error::GatewayRejected(
                body.message
                    .unwrap_or_else(|| "gateway refused the order".to_string()),
            ));
        }
        let session_id = body.session_id.ok_or_else(|| {
            Error::GatewayRejected("gateway response missing sessionId".to_string())
        })?;
        Ok(CreatedOrder {
            session_id,
            initial_status: body.status.unwrap_or_else(|| "PENDING".to_string()),
        })
    }

    async fn verify_order(&self, order_id: &str) -> Result<VerifiedOrder> {
        let request = OrderStatusRequest {
            merchant_id: &self.merchant_id,
            token: self.status_token(order_id),
            order_id,
        };

        let resp = self.post_json("/orders/status", &request).await?;

        if resp.status().as_u16() == 404 {
            return Err(Error::NotFound(format!(
                "order {order_id} not found at gateway"
            )));
        }
        if resp.status().is_client_error() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::GatewayRejected(message));
        }
        let body: OrderStatusResponse = resp
            .json()
            .await
            .map_err(|e| Error::GatewayUnavailable(format!("malformed gateway response: {e}")))?;
        if !body.success {
            return Err(Error::NotFound(
                body.message
                    .unwrap_or_else(|| format!("order {order_id} not found at gateway")),
            ));
        }
        let gateway_status = body
            .status
            .ok_or_else(|| Error::GatewayUnavailable("gateway response missing status".to_string()))?;
        Ok(VerifiedOrder {
            gateway_status,
            payment_method: body.payment_method,
            paid_at: body.paid_at,
        })
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        let expected = sign_webhook(&self.webhook_secret, payload);
        constant_time_eq(&expected, signature)
    }
}
