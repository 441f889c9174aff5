//! Provider clients against local fake Stripe and PayPal APIs.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::{
    Form, Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::post,
};
use commerce_core::error::{GatewayError, VerificationError};
use commerce_core::gateway::{PaymentGateway, RefundCall};
use commerce_core::mocks::{InMemoryStore, test_clock};
use commerce_core::money::Money;
use commerce_core::rate_limit::InMemoryCounterStore;
use commerce_core::reconciler::verify::{WebhookHeaders, WebhookVerifier, paypal_headers};
use commerce_server::providers::paypal::{PaypalClient, PaypalGateway, PaypalWebhookVerifier};
use commerce_server::providers::stripe::StripeGateway;
use commerce_server::{Config, LogNotifier, build_state};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct Recorded {
    requests: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
    token_calls: Arc<Mutex<u32>>,
}

impl Recorded {
    fn requests(&self) -> Vec<(HeaderMap, Value)> {
        self.requests.lock().unwrap().clone()
    }

    fn token_calls(&self) -> u32 {
        *self.token_calls.lock().unwrap()
    }
}

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

fn call(reference: &str, cents: i64) -> RefundCall {
    RefundCall {
        payment_reference: reference.to_string(),
        amount: Money::from_cents(cents),
        currency: "USD".to_string(),
        idempotency_key: "refund-1".to_string(),
        reason: Some("Arrived damaged".to_string()),
    }
}

async fn stripe_refunds(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    let amount = form.get("amount").cloned().unwrap_or_default();
    recorded
        .requests
        .lock()
        .unwrap()
        .push((headers, serde_json::to_value(&form).unwrap()));
    if form.get("payment_intent").map(String::as_str) == Some("pi_refunded") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": {"code": "charge_already_refunded", "message": "Charge already refunded"}})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({"id": "re_1", "status": "succeeded", "amount": amount})),
    )
}

async fn stripe_api() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/v1/refunds", post(stripe_refunds))
        .with_state(recorded.clone());
    (spawn(app).await, recorded)
}

#[tokio::test]
async fn stripe_refund_posts_form_with_idempotency_key() {
    let (base, recorded) = stripe_api().await;
    let gateway = StripeGateway::new(reqwest::Client::new(), "sk_test_1".into(), &base, TIMEOUT);

    let receipt = gateway.refund(call("pi_1", 4_000)).await.unwrap();

    assert_eq!(receipt.provider_refund_reference, "re_1");
    assert_eq!(receipt.status, "succeeded");
    let requests = recorded.requests();
    let (headers, form) = &requests[0];
    assert_eq!(headers["idempotency-key"], "refund-1");
    assert_eq!(headers["authorization"], "Bearer sk_test_1");
    assert_eq!(form["payment_intent"], "pi_1");
    assert_eq!(form["amount"], "4000");
    assert_eq!(form["metadata[reason]"], "Arrived damaged");
    assert_eq!(form["metadata[refund_request_id]"], "refund-1");
}

#[tokio::test]
async fn stripe_rejection_carries_provider_message() {
    let (base, _) = stripe_api().await;
    let gateway = StripeGateway::new(reqwest::Client::new(), "sk_test_1".into(), &base, TIMEOUT);

    let err = gateway.refund(call("pi_refunded", 4_000)).await.unwrap_err();

    assert_eq!(
        err,
        GatewayError::Rejected {
            status: 400,
            message: "Charge already refunded".into()
        }
    );
}

#[tokio::test]
async fn unreachable_provider_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let gateway = StripeGateway::new(reqwest::Client::new(), "sk".into(), &base, TIMEOUT);

    let err = gateway.refund(call("pi_1", 100)).await.unwrap_err();

    assert!(matches!(err, GatewayError::Transport(_) | GatewayError::Timeout(_)), "{err:?}");
}

async fn paypal_token(State(recorded): State<Recorded>) -> Json<Value> {
    *recorded.token_calls.lock().unwrap() += 1;
    Json(json!({"access_token": "A21AA", "token_type": "Bearer", "expires_in": 32_400}))
}

async fn paypal_refund(
    State(recorded): State<Recorded>,
    Path(capture_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    recorded.requests.lock().unwrap().push((headers, body));
    (
        StatusCode::CREATED,
        Json(json!({"id": format!("RF-{capture_id}"), "status": "COMPLETED"})),
    )
}

async fn paypal_verify(
    State(recorded): State<Recorded>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let verdict = if body["transmission_sig"] == "good" {
        "SUCCESS"
    } else {
        "FAILURE"
    };
    recorded.requests.lock().unwrap().push((headers, body));
    Json(json!({"verification_status": verdict}))
}

async fn paypal_api() -> (Arc<PaypalClient>, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/v1/oauth2/token", post(paypal_token))
        .route("/v2/payments/captures/:capture_id/refund", post(paypal_refund))
        .route("/v1/notifications/verify-webhook-signature", post(paypal_verify))
        .with_state(recorded.clone());
    let base = spawn(app).await;
    let client = PaypalClient::new(
        reqwest::Client::new(),
        "client".into(),
        "secret".into(),
        &base,
        TIMEOUT,
    );
    (Arc::new(client), recorded)
}

fn transmission(signature: &str) -> WebhookHeaders {
    WebhookHeaders::new()
        .with(paypal_headers::TRANSMISSION_ID, "tx-1")
        .with(paypal_headers::TRANSMISSION_TIME, "2025-01-01T00:00:00Z")
        .with(paypal_headers::TRANSMISSION_SIG, signature)
        .with(paypal_headers::CERT_URL, "https://api.paypal.com/cert.pem")
        .with(paypal_headers::AUTH_ALGO, "SHA256withRSA")
}

#[tokio::test]
async fn paypal_refund_reuses_the_access_token() {
    let (client, recorded) = paypal_api().await;
    let gateway = PaypalGateway::new(client);

    let first = gateway.refund(call("CAP-1", 4_050)).await.unwrap();
    let second = gateway.refund(call("CAP-2", 100)).await.unwrap();

    assert_eq!(first.provider_refund_reference, "RF-CAP-1");
    assert_eq!(second.status, "COMPLETED");
    assert_eq!(recorded.token_calls(), 1);
    let requests = recorded.requests();
    let (headers, body) = &requests[0];
    assert_eq!(headers["paypal-request-id"], "refund-1");
    assert_eq!(headers["authorization"], "Bearer A21AA");
    assert_eq!(body["amount"], json!({"value": "40.50", "currency_code": "USD"}));
    assert_eq!(body["note_to_payer"], "Arrived damaged");
    assert_eq!(body["custom_id"], "refund-1");
}

#[tokio::test]
async fn paypal_verifier_checks_with_the_api() {
    let (client, recorded) = paypal_api().await;
    let verifier = PaypalWebhookVerifier::new(client, "WH-ID".into());
    let body = json!({"id": "WH-1", "event_type": "PAYMENT.CAPTURE.COMPLETED"}).to_string();

    verifier
        .verify(&transmission("good"), body.as_bytes())
        .await
        .unwrap();
    let err = verifier
        .verify(&transmission("forged"), body.as_bytes())
        .await
        .unwrap_err();

    assert_eq!(err, VerificationError::SignatureMismatch);
    let requests = recorded.requests();
    assert_eq!(requests[0].1["webhook_id"], "WH-ID");
    assert_eq!(requests[0].1["webhook_event"]["id"], "WH-1");
}

#[tokio::test]
async fn paypal_verifier_needs_transmission_headers() {
    let (client, recorded) = paypal_api().await;
    let verifier = PaypalWebhookVerifier::new(client, "WH-ID".into());

    let err = verifier
        .verify(&WebhookHeaders::new(), b"{}")
        .await
        .unwrap_err();

    assert!(matches!(err, VerificationError::MissingHeader(_)));
    assert_eq!(recorded.token_calls(), 0);
    assert!(recorded.requests().is_empty());
}

#[tokio::test]
async fn paypal_outage_is_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let client = Arc::new(PaypalClient::new(
        reqwest::Client::new(),
        "client".into(),
        "secret".into(),
        &base,
        TIMEOUT,
    ));
    let verifier = PaypalWebhookVerifier::new(client, "WH-ID".into());

    let err = verifier
        .verify(&transmission("good"), b"{\"id\":\"WH-1\"}")
        .await
        .unwrap_err();

    assert!(matches!(err, VerificationError::Unavailable(_)), "{err:?}");
}

#[tokio::test]
async fn unconfigured_providers_refuse_webhooks() {
    let config = Config::from_lookup(|key| {
        (key == "ADMIN_API_TOKENS").then(|| "ops:token-1".to_string())
    });
    let clock = Arc::new(test_clock());
    let store = Arc::new(InMemoryStore::new(clock.clone()));
    let state = build_state(
        &config,
        store,
        Arc::new(InMemoryCounterStore::new()),
        clock,
        Arc::new(LogNotifier),
        &reqwest::Client::new(),
    );
    let base = spawn(commerce_web::router(state)).await;
    let http = reqwest::Client::new();

    let webhook = http
        .post(format!("{base}/api/webhooks/stripe"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(webhook.status().as_u16(), 401);

    let admin = http
        .get(format!("{base}/api/admin/store-credit/jane@example.com"))
        .bearer_auth("token-1")
        .send()
        .await
        .unwrap();
    assert_eq!(admin.status().as_u16(), 200);
}
