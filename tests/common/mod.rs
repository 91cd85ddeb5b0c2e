#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body, Bytes},
    extract::ConnectInfo,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use secrecy::Secret;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use confirmed_web::api::{self, AppState};
use confirmed_web::config::{ClientFiles, Config};
use confirmed_web::models::{Charge, Invoice, PaymentMethod, PlanType, Receipt, ReceiptType};
use confirmed_web::repository::MemoryStore;
use confirmed_web::services::mailer::{Email, Mailer};
use confirmed_web::services::receipts::{ReceiptError, ReceiptValidator};
use confirmed_web::services::stripe::{
    Billing, NewStripeSubscription, StripeError, StripeSubscription,
};

pub const PASSWORD: &str = "Tunnel-Vision-42";
pub const VALID_RECEIPT: &str = "dmFsaWQtcmVjZWlwdA==";

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        domain: "confirmed.test".to_string(),
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "TEST".to_string(),
        session_secret: Secret::new("session-secret".to_string()),
        email_secret: Secret::new("email-secret".to_string()),
        key_signing_secret: Secret::new("key-signing-secret".to_string()),
        stripe_secret_key: Secret::new("sk_test".to_string()),
        stripe_public_key: "pk_test".to_string(),
        stripe_api_base: "http://127.0.0.1:9".to_string(),
        apple_shared_secret: None,
        apple_verify_url: "http://127.0.0.1:9/verifyReceipt".to_string(),
        apple_sandbox_url: "http://127.0.0.1:9/verifyReceipt".to_string(),
        google_public_key: None,
        google_play_api_token: None,
        google_package_name: None,
        google_play_api_base: "http://127.0.0.1:9".to_string(),
        speed_test_bucket: Some("speedtest-bucket".to_string()),
        client_files: ClientFiles {
            mac_app: Some("https://downloads.confirmed.test/Tunnels.dmg".to_string()),
            ..ClientFiles::default()
        },
        brute_force_window_secs: 3600,
        trust_proxy: false,
    }
}

/// Keeps every message instead of delivering it.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last_to(&self, to: &str) -> Email {
        self.sent()
            .into_iter()
            .rev()
            .find(|e| e.to == to)
            .unwrap_or_else(|| panic!("no email sent to {to}"))
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: Email) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

/// Pulls a query parameter out of the first link in an email body.
pub fn link_param(email: &Email, name: &str) -> String {
    let link = email
        .body
        .split_whitespace()
        .find(|word| word.starts_with("https://"))
        .expect("email has a link");
    let url = url::Url::parse(link).expect("valid link");
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| panic!("link has no {name}"))
}

/// Stripe stand-in holding cards in memory.
#[derive(Default)]
pub struct FakeBilling {
    pub cards: Mutex<Vec<PaymentMethod>>,
    pub subscriptions: Mutex<Vec<NewStripeSubscription>>,
    pub cancelled: Mutex<Vec<String>>,
    pub invoices_down: AtomicBool,
}

#[async_trait]
impl Billing for FakeBilling {
    async fn create_customer(&self, _: Uuid, _: Option<&str>) -> Result<String, StripeError> {
        Ok("cus_test".to_string())
    }

    async fn payment_methods(&self, _: &str) -> Result<Vec<PaymentMethod>, StripeError> {
        Ok(self.cards.lock().unwrap().clone())
    }

    async fn invoices(&self, _: &str) -> Result<Vec<Invoice>, StripeError> {
        if self.invoices_down.load(Ordering::SeqCst) {
            return Err(StripeError::ApiError {
                status: 503,
                message: "Stripe is unavailable".to_string(),
            });
        }
        Ok(Vec::new())
    }

    async fn charges(&self, _: &str) -> Result<Vec<Charge>, StripeError> {
        Ok(Vec::new())
    }

    async fn add_source(&self, _: &str, source: &str) -> Result<String, StripeError> {
        let mut cards = self.cards.lock().unwrap();
        let id = format!("card_{}", cards.len() + 1);
        let is_default = cards.is_empty();
        cards.push(PaymentMethod {
            id: id.clone(),
            brand: "Visa".to_string(),
            last4: source.chars().rev().take(4).collect(),
            exp_month: 4,
            exp_year: 2030,
            is_default,
        });
        Ok(id)
    }

    async fn set_default_source(&self, _: &str, card_id: &str) -> Result<(), StripeError> {
        for card in self.cards.lock().unwrap().iter_mut() {
            card.is_default = card.id == card_id;
        }
        Ok(())
    }

    async fn delete_source(&self, _: &str, card_id: &str) -> Result<(), StripeError> {
        self.cards.lock().unwrap().retain(|c| c.id != card_id);
        Ok(())
    }

    async fn create_subscription(
        &self,
        request: NewStripeSubscription,
    ) -> Result<StripeSubscription, StripeError> {
        let trial_end = request.trial_days.map(|d| Utc::now() + Duration::days(d.into()));
        self.subscriptions.lock().unwrap().push(request);
        Ok(StripeSubscription {
            id: "sub_test".to_string(),
            status: if trial_end.is_some() { "trialing" } else { "active" }.to_string(),
            current_period_end: Utc::now() + Duration::days(30),
            trial_end,
        })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), StripeError> {
        self.cancelled.lock().unwrap().push(subscription_id.to_string());
        Ok(())
    }
}

/// Accepts [`VALID_RECEIPT`] as an active monthly subscription.
pub struct FakeReceipts;

#[async_trait]
impl ReceiptValidator for FakeReceipts {
    async fn validate(&self, receipt_type: ReceiptType, data: &str) -> Result<Receipt, ReceiptError> {
        if data != VALID_RECEIPT {
            return Err(ReceiptError::AppleStatus(21002));
        }
        Ok(Receipt {
            id: format!("{}-1000000", receipt_type),
            receipt_type,
            plan_type: PlanType::from_store_product(receipt_type, "monthly"),
            expiration_date: Utc::now() + Duration::days(30),
            cancellation_date: None,
            in_trial: false,
            data: Some(data.to_string()),
        })
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("json body")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn location(&self) -> &str {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }
}

/// The whole app over in-memory ports, with a one-browser cookie jar.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub mailer: Arc<RecordingMailer>,
    pub billing: Arc<FakeBilling>,
    cookie: Mutex<Option<String>>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        let mailer = Arc::new(RecordingMailer::default());
        let billing = Arc::new(FakeBilling::default());
        let state = AppState::new(
            Arc::new(config),
            Arc::new(MemoryStore::new()),
            billing.clone(),
            Arc::new(FakeReceipts),
            mailer.clone(),
        )
        .expect("app state");
        let router = api::app(state.clone(), tower_sessions::MemoryStore::default());

        Self {
            router,
            state,
            mailer,
            billing,
            cookie: Mutex::new(None),
        }
    }

    pub async fn send(&self, mut request: Request<Body>) -> TestResponse {
        if let Some(cookie) = self.cookie.lock().unwrap().clone() {
            request
                .headers_mut()
                .insert(header::COOKIE, cookie.parse().unwrap());
        }
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 7], 4000))));

        let response = self.router.clone().oneshot(request).await.unwrap();
        if let Some(set_cookie) = response.headers().get(header::SET_COOKIE) {
            let pair = set_cookie.to_str().unwrap().split(';').next().unwrap().to_string();
            *self.cookie.lock().unwrap() = Some(pair);
        }

        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        TestResponse { status, headers, body }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(request(Method::GET, uri, "application/json", Body::empty(), None))
            .await
    }

    pub async fn get_html(&self, uri: &str) -> TestResponse {
        self.send(request(Method::GET, uri, "text/html", Body::empty(), None))
            .await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> TestResponse {
        self.send(request(
            Method::POST,
            uri,
            "application/json",
            Body::from(body.to_string()),
            Some("application/json"),
        ))
        .await
    }

    pub async fn post_form(&self, uri: &str, form: &[(&str, &str)]) -> TestResponse {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        self.send(request(
            Method::POST,
            uri,
            "text/html",
            Body::from(body),
            Some("application/x-www-form-urlencoded"),
        ))
        .await
    }

    /// Signs up, confirms and signs in `email` with [`PASSWORD`].
    pub async fn signed_in_user(&self, email: &str) {
        let response = self
            .post_json("/signup", serde_json::json!({ "email": email, "password": PASSWORD }))
            .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.text());

        let code = link_param(&self.mailer.last_to(email), "code");
        let confirm = format!("/confirm-email?email={}&code={}", email, code);
        assert_eq!(self.get(&confirm).await.status, StatusCode::OK);

        let response = self
            .post_json("/signin", serde_json::json!({ "email": email, "password": PASSWORD }))
            .await;
        assert_eq!(response.json()["message"], "Signed In");
    }
}

fn request(
    method: Method,
    uri: &str,
    accept: &str,
    body: Body,
    content_type: Option<&str>,
) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::ACCEPT, accept);
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder.body(body).unwrap()
}
