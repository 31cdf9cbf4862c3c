use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use consult_booking::config::{CircuitBreakerConfig, GatewayConfig};
use consult_booking::error::Error;
use consult_booking::services::gateway::{
    sign_webhook, CallbackUrls, CustomerInfo, GatewayAdapter, HttpGatewayClient, NewOrder,
};

fn client_for(base_url: &str, failure_threshold: u32) -> HttpGatewayClient {
    HttpGatewayClient::from_config(
        &GatewayConfig {
            merchant_id: "merchant-1".to_string(),
            merchant_password: "hunter2".to_string(),
            webhook_secret: "whsec".to_string(),
            base_url: base_url.to_string(),
            success_url: "https://example.com/payment/success".to_string(),
            fail_url: "https://example.com/payment/fail".to_string(),
            webhook_url: "https://example.com/api/webhooks/payment".to_string(),
            timeout_seconds: 5,
        },
        &CircuitBreakerConfig {
            failure_threshold,
            timeout_seconds: 60,
        },
    )
}

fn customer() -> CustomerInfo {
    CustomerInfo {
        name: "Ada Lovelace".to_string(),
        email: "ada@example.com".to_string(),
        phone: Some("+3712000000".to_string()),
    }
}

fn urls() -> CallbackUrls {
    CallbackUrls {
        success_url: "https://example.com/payment/success".to_string(),
        fail_url: "https://example.com/payment/fail".to_string(),
        webhook_url: "https://example.com/api/webhooks/payment".to_string(),
    }
}

fn new_order<'a>(customer: &'a CustomerInfo, urls: &'a CallbackUrls) -> NewOrder<'a> {
    NewOrder {
        order_id: "ord-1",
        amount: 50_00,
        currency: "EUR",
        customer,
        urls,
    }
}

#[tokio::test]
async fn create_order_returns_session_on_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/init"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "sessionId": "sess-1",
            "status": "ACTIVE",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), 5);
    let (customer, urls) = (customer(), urls());
    let created = client.create_order(new_order(&customer, &urls)).await.unwrap();
    assert_eq!(created.session_id, "sess-1");
    assert_eq!(created.initial_status, "ACTIVE");
}

#[tokio::test]
async fn server_errors_surface_as_gateway_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/init"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), 5);
    let (customer, urls) = (customer(), urls());
    let err = client
        .create_order(new_order(&customer, &urls))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GatewayUnavailable(_)));
}

#[tokio::test]
async fn client_errors_surface_as_gateway_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/init"))
        .respond_with(ResponseTemplate::new(422).set_body_string("amount below minimum"))
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), 5);
    let (customer, urls) = (customer(), urls());
    let err = client
        .create_order(new_order(&customer, &urls))
        .await
        .unwrap_err();
    match err {
        Error::GatewayRejected(message) => assert!(message.contains("amount below minimum")),
        other => panic!("expected GatewayRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn refusal_in_response_body_is_gateway_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/init"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": false,
            "message": "merchant is suspended",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), 5);
    let (customer, urls) = (customer(), urls());
    let err = client
        .create_order(new_order(&customer, &urls))
        .await
        .unwrap_err();
    match err {
        Error::GatewayRejected(message) => assert!(message.contains("suspended")),
        other => panic!("expected GatewayRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn verify_order_reports_raw_gateway_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "success": true,
            "status": "PAID",
            "paymentMethod": "card",
            "paidAt": "2026-01-10T10:00:00Z",
        })))
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), 5);
    let verified = client.verify_order("ord-1").await.unwrap();
    assert_eq!(verified.gateway_status, "PAID");
    assert_eq!(verified.payment_method.as_deref(), Some("card"));
    assert!(verified.paid_at.is_some());
}

#[tokio::test]
async fn verify_order_maps_http_404_to_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders/status"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), 5);
    let err = client.verify_order("ord-unknown").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn breaker_opens_after_repeated_failures_and_stops_calling_out() {
    let server = MockServer::start().await;
    // The breaker must stop at two upstream calls; a third would fail the
    // mock expectation.
    Mock::given(method("POST"))
        .and(path("/orders/status"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server.uri(), 2);
    for _ in 0..2 {
        let err = client.verify_order("ord-1").await.unwrap_err();
        assert!(matches!(err, Error::GatewayUnavailable(_)));
    }

    let err = client.verify_order("ord-1").await.unwrap_err();
    match err {
        Error::GatewayUnavailable(message) => assert!(message.contains("circuit breaker")),
        other => panic!("expected GatewayUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn webhook_signature_verification_matches_the_signing_scheme() {
    let server = MockServer::start().await;
    let client = client_for(&server.uri(), 5);

    let payload = br#"{"orderId":"ord-1","status":"PAID"}"#;
    let good = sign_webhook("whsec", payload);
    let bad = sign_webhook("stolen-secret", payload);

    assert!(client.verify_webhook_signature(payload, &good));
    assert!(!client.verify_webhook_signature(payload, &bad));
    assert!(!client.verify_webhook_signature(payload, ""));
}
