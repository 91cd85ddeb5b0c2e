//! Thin Stripe REST client covering customers, cards, invoices, charges and
//! subscriptions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Charge, Invoice, PaymentMethod};

#[derive(Error, Debug)]
pub enum StripeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Stripe API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Unexpected Stripe response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStripeSubscription {
    pub customer_id: String,
    /// Price id, `{plan}-{currency}` e.g. `all-monthly-usd`.
    pub price: String,
    pub trial_days: Option<u32>,
    pub coupon: Option<String>,
    pub default_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String,
    pub current_period_end: DateTime<Utc>,
    pub trial_end: Option<DateTime<Utc>>,
}

impl StripeSubscription {
    pub fn in_trial(&self) -> bool {
        self.status == "trialing"
    }
}

/// Payment provider port.
#[async_trait]
pub trait Billing: Send + Sync {
    async fn create_customer(&self, user_id: Uuid, email: Option<&str>) -> Result<String, StripeError>;

    async fn payment_methods(&self, customer_id: &str) -> Result<Vec<PaymentMethod>, StripeError>;

    async fn invoices(&self, customer_id: &str) -> Result<Vec<Invoice>, StripeError>;

    async fn charges(&self, customer_id: &str) -> Result<Vec<Charge>, StripeError>;

    /// Attaches a tokenised card and returns the new card id.
    async fn add_source(&self, customer_id: &str, source: &str) -> Result<String, StripeError>;

    async fn set_default_source(&self, customer_id: &str, card_id: &str) -> Result<(), StripeError>;

    async fn delete_source(&self, customer_id: &str, card_id: &str) -> Result<(), StripeError>;

    async fn create_subscription(
        &self,
        request: NewStripeSubscription,
    ) -> Result<StripeSubscription, StripeError>;

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), StripeError>;
}

pub struct StripeClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: Secret<String>,
}

impl StripeClient {
    pub fn new(api_base: &str, secret_key: Secret<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, StripeError> {
        let response = request
            .bearer_auth(self.secret_key.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            tracing::warn!(status, message = %message, "Stripe request failed");
            return Err(StripeError::ApiError { status, message });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Billing for StripeClient {
    async fn create_customer(&self, user_id: Uuid, email: Option<&str>) -> Result<String, StripeError> {
        let user_id = user_id.to_string();
        let mut form = vec![("metadata[user_id]", user_id.as_str())];
        if let Some(email) = email {
            form.push(("email", email));
        }

        let customer: StripeObject = self
            .send(self.http.post(self.url("/v1/customers")).form(&form))
            .await?;
        Ok(customer.id)
    }

    async fn payment_methods(&self, customer_id: &str) -> Result<Vec<PaymentMethod>, StripeError> {
        let customer: CustomerResponse = self
            .send(self.http.get(self.url(&format!("/v1/customers/{}", customer_id))))
            .await?;
        let sources: ListResponse<CardResponse> = self
            .send(
                self.http
                    .get(self.url(&format!("/v1/customers/{}/sources", customer_id)))
                    .query(&[("object", "card"), ("limit", "100")]),
            )
            .await?;

        Ok(sources
            .data
            .into_iter()
            .map(|card| {
                let is_default = customer.default_source.as_deref() == Some(card.id.as_str());
                PaymentMethod {
                    id: card.id,
                    brand: card.brand,
                    last4: card.last4,
                    exp_month: card.exp_month,
                    exp_year: card.exp_year,
                    is_default,
                }
            })
            .collect())
    }

    async fn invoices(&self, customer_id: &str) -> Result<Vec<Invoice>, StripeError> {
        let list: ListResponse<InvoiceResponse> = self
            .send(
                self.http
                    .get(self.url("/v1/invoices"))
                    .query(&[("customer", customer_id), ("limit", "100")]),
            )
            .await?;

        list.data
            .into_iter()
            .map(|i| {
                Ok(Invoice {
                    id: i.id,
                    number: i.number,
                    amount_due: i.amount_due,
                    currency: i.currency,
                    status: i.status,
                    created: timestamp(i.created)?,
                    hosted_invoice_url: i.hosted_invoice_url,
                })
            })
            .collect()
    }

    async fn charges(&self, customer_id: &str) -> Result<Vec<Charge>, StripeError> {
        let list: ListResponse<ChargeResponse> = self
            .send(
                self.http
                    .get(self.url("/v1/charges"))
                    .query(&[("customer", customer_id), ("limit", "100")]),
            )
            .await?;

        list.data
            .into_iter()
            .map(|c| {
                Ok(Charge {
                    id: c.id,
                    amount: c.amount,
                    currency: c.currency,
                    status: c.status,
                    description: c.description,
                    created: timestamp(c.created)?,
                    receipt_url: c.receipt_url,
                })
            })
            .collect()
    }

    async fn add_source(&self, customer_id: &str, source: &str) -> Result<String, StripeError> {
        let card: StripeObject = self
            .send(
                self.http
                    .post(self.url(&format!("/v1/customers/{}/sources", customer_id)))
                    .form(&[("source", source)]),
            )
            .await?;
        Ok(card.id)
    }

    async fn set_default_source(&self, customer_id: &str, card_id: &str) -> Result<(), StripeError> {
        let _: StripeObject = self
            .send(
                self.http
                    .post(self.url(&format!("/v1/customers/{}", customer_id)))
                    .form(&[("default_source", card_id)]),
            )
            .await?;
        Ok(())
    }

    async fn delete_source(&self, customer_id: &str, card_id: &str) -> Result<(), StripeError> {
        let _: StripeObject = self
            .send(
                self.http
                    .delete(self.url(&format!("/v1/customers/{}/sources/{}", customer_id, card_id))),
            )
            .await?;
        Ok(())
    }

    async fn create_subscription(
        &self,
        request: NewStripeSubscription,
    ) -> Result<StripeSubscription, StripeError> {
        let mut form = vec![
            ("customer", request.customer_id.clone()),
            ("items[0][price]", request.price.clone()),
        ];
        if let Some(days) = request.trial_days {
            form.push(("trial_period_days", days.to_string()));
        }
        if let Some(coupon) = &request.coupon {
            form.push(("coupon", coupon.clone()));
        }
        if let Some(source) = &request.default_source {
            form.push(("default_source", source.clone()));
        }

        let response: SubscriptionResponse = self
            .send(self.http.post(self.url("/v1/subscriptions")).form(&form))
            .await?;

        Ok(StripeSubscription {
            id: response.id,
            status: response.status,
            current_period_end: timestamp(response.current_period_end)?,
            trial_end: response.trial_end.map(timestamp).transpose()?,
        })
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> Result<(), StripeError> {
        let _: StripeObject = self
            .send(
                self.http
                    .delete(self.url(&format!("/v1/subscriptions/{}", subscription_id))),
            )
            .await?;
        Ok(())
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, StripeError> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| StripeError::InvalidResponse(format!("bad timestamp {}", secs)))
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StripeObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct CustomerResponse {
    default_source: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CardResponse {
    id: String,
    brand: String,
    last4: String,
    exp_month: u32,
    exp_year: u32,
}

#[derive(Debug, Deserialize)]
struct InvoiceResponse {
    id: String,
    number: Option<String>,
    amount_due: i64,
    currency: String,
    status: Option<String>,
    created: i64,
    hosted_invoice_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    id: String,
    amount: i64,
    currency: String,
    status: String,
    description: Option<String>,
    created: i64,
    receipt_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionResponse {
    id: String,
    status: String,
    current_period_end: i64,
    trial_end: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> StripeClient {
        StripeClient::new(&server.uri(), Secret::new("sk_test_123".to_string()))
    }

    #[tokio::test]
    async fn payment_methods_mark_the_default_card() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/customers/cus_1"))
            .and(header("authorization", "Bearer sk_test_123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "cus_1",
                "default_source": "card_2"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/customers/cus_1/sources"))
            .and(query_param("object", "card"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    { "id": "card_1", "brand": "Visa", "last4": "4242", "exp_month": 4, "exp_year": 2030 },
                    { "id": "card_2", "brand": "MasterCard", "last4": "4444", "exp_month": 12, "exp_year": 2031 }
                ]
            })))
            .mount(&server)
            .await;

        let methods = client(&server).payment_methods("cus_1").await.unwrap();

        assert_eq!(methods.len(), 2);
        assert!(!methods[0].is_default);
        assert!(methods[1].is_default);
        assert_eq!(methods[1].last4, "4444");
    }

    #[tokio::test]
    async fn subscription_carries_trial_and_coupon() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/subscriptions"))
            .and(body_string_contains("trial_period_days=7"))
            .and(body_string_contains("coupon=referral-20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "sub_1",
                "status": "trialing",
                "current_period_end": 1_700_000_000,
                "trial_end": 1_700_600_000
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client(&server)
            .create_subscription(NewStripeSubscription {
                customer_id: "cus_1".to_string(),
                price: "all-monthly-usd".to_string(),
                trial_days: Some(7),
                coupon: Some("referral-20".to_string()),
                default_source: Some("card_1".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(created.id, "sub_1");
        assert!(created.in_trial());
        assert_eq!(created.trial_end.map(|t| t.timestamp()), Some(1_700_600_000));
    }

    #[tokio::test]
    async fn api_errors_keep_stripe_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/customers/cus_1/sources"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": { "message": "Your card was declined." }
            })))
            .mount(&server)
            .await;

        let error = client(&server).add_source("cus_1", "tok_declined").await.unwrap_err();

        match error {
            StripeError::ApiError { status, message } => {
                assert_eq!(status, 402);
                assert_eq!(message, "Your card was declined.");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
