//! In-app purchase receipt validation against the App Store and Google Play.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use ring::signature;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Config;
use crate::error::{code, AppError};
use crate::models::{PlanType, Receipt, ReceiptType};

/// App Store status meaning a sandbox receipt was sent to production.
const APPLE_SANDBOX_RECEIPT: i64 = 21007;

#[derive(Error, Debug)]
pub enum ReceiptError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("App Store returned status {0}")]
    AppleStatus(i64),

    #[error("Receipt contains no subscription")]
    NoSubscription,

    #[error("Android receipt signature mismatch")]
    AndroidSignature,

    #[error("Malformed Android receipt: {0}")]
    AndroidFormat(String),

    #[error("Google Play API error: {0}")]
    PlayApi(String),

    #[error("{0} receipt validation is not configured")]
    NotConfigured(&'static str),

    #[error("Receipt type {0} cannot be validated as an in-app purchase")]
    Unsupported(ReceiptType),
}

impl From<ReceiptError> for AppError {
    fn from(e: ReceiptError) -> Self {
        match e {
            ReceiptError::AppleStatus(status) => {
                AppError::bad_request(code::APPLE_RESPONSE, "Error on response from Apple")
                    .with_detail(format!("status {}", status))
            }
            ReceiptError::NoSubscription => AppError::bad_request(
                code::NO_SUBSCRIPTION_IN_RECEIPT,
                "No subscription found in receipt.",
            ),
            ReceiptError::AndroidSignature => AppError::bad_request(
                code::ANDROID_SIGNATURE,
                "Android receipt does not match its signature.",
            ),
            ReceiptError::AndroidFormat(detail) => {
                AppError::bad_request(code::ANDROID_RECEIPT_FORMAT, "Invalid Android receipt.")
                    .with_detail(detail)
            }
            ReceiptError::Unsupported(_) => {
                AppError::validation("Invalid IAP receipt type (must be ios/android)")
            }
            other => AppError::internal(other),
        }
    }
}

/// In-app purchase verification port.
#[async_trait]
pub trait ReceiptValidator: Send + Sync {
    async fn validate(&self, receipt_type: ReceiptType, data: &str) -> Result<Receipt, ReceiptError>;
}

pub struct StoreReceiptValidator {
    http: reqwest::Client,
    apple_shared_secret: Option<Secret<String>>,
    apple_verify_url: String,
    apple_sandbox_url: String,
    google_public_key: Option<Vec<u8>>,
    google_play_api_token: Option<Secret<String>>,
    google_play_api_base: String,
}

impl StoreReceiptValidator {
    pub fn from_config(config: &Config) -> Result<Self, ReceiptError> {
        let google_public_key = config
            .google_public_key
            .as_deref()
            .map(|encoded| {
                let der = STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| ReceiptError::AndroidFormat(format!("public key: {}", e)))?;
                rsa_public_key_from_spki(&der).map(<[u8]>::to_vec)
            })
            .transpose()?;

        Ok(Self {
            http: reqwest::Client::new(),
            apple_shared_secret: config
                .apple_shared_secret
                .as_ref()
                .map(|s| Secret::new(s.expose_secret().clone())),
            apple_verify_url: config.apple_verify_url.clone(),
            apple_sandbox_url: config.apple_sandbox_url.clone(),
            google_public_key,
            google_play_api_token: config
                .google_play_api_token
                .as_ref()
                .map(|s| Secret::new(s.expose_secret().clone())),
            google_play_api_base: config.google_play_api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn post_apple(&self, url: &str, data: &str) -> Result<AppleResponse, ReceiptError> {
        let body = AppleRequest {
            receipt_data: data,
            password: self.apple_shared_secret.as_ref().map(|s| s.expose_secret().as_str()),
            exclude_old_transactions: true,
        };
        Ok(self.http.post(url).json(&body).send().await?.json().await?)
    }

    async fn validate_apple(&self, data: &str) -> Result<Receipt, ReceiptError> {
        let mut response = self.post_apple(&self.apple_verify_url, data).await?;
        if response.status == APPLE_SANDBOX_RECEIPT {
            tracing::debug!("Sandbox receipt, retrying against sandbox");
            response = self.post_apple(&self.apple_sandbox_url, data).await?;
        }
        if response.status != 0 {
            return Err(ReceiptError::AppleStatus(response.status));
        }

        let latest = response
            .latest_receipt_info
            .into_iter()
            .max_by_key(|info| info.expires_at_ms())
            .ok_or(ReceiptError::NoSubscription)?;

        let expiration_date = millis(latest.expires_at_ms())?;
        let cancellation_date = latest
            .cancellation_date_ms
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .map(millis)
            .transpose()?;

        Ok(Receipt {
            id: latest.original_transaction_id,
            receipt_type: ReceiptType::Ios,
            plan_type: PlanType::from_store_product(ReceiptType::Ios, &latest.product_id),
            expiration_date,
            cancellation_date,
            in_trial: latest.is_trial_period.as_deref() == Some("true"),
            data: Some(data.to_string()),
        })
    }

    async fn validate_android(&self, data: &str) -> Result<Receipt, ReceiptError> {
        let public_key = self
            .google_public_key
            .as_deref()
            .ok_or(ReceiptError::NotConfigured("Google Play"))?;
        let purchase = verify_android_receipt(public_key, data)?;
        let plan_type = PlanType::from_store_product(ReceiptType::Android, &purchase.product_id);
        let purchased_at = millis(purchase.purchase_time)?;

        let (expiration_date, cancellation_date, in_trial) = match &self.google_play_api_token {
            Some(token) => self.fetch_play_subscription(token, &purchase).await?,
            None => (plan_type.period_end(purchased_at), None, false),
        };

        Ok(Receipt {
            id: purchase.subscription_order_id().to_string(),
            receipt_type: ReceiptType::Android,
            plan_type,
            expiration_date,
            cancellation_date,
            in_trial,
            data: Some(data.to_string()),
        })
    }

    async fn fetch_play_subscription(
        &self,
        token: &Secret<String>,
        purchase: &AndroidPurchase,
    ) -> Result<(DateTime<Utc>, Option<DateTime<Utc>>, bool), ReceiptError> {
        let url = format!(
            "{}/androidpublisher/v3/applications/{}/purchases/subscriptions/{}/tokens/{}",
            self.google_play_api_base,
            purchase.package_name,
            purchase.product_id,
            purchase.purchase_token
        );
        let response = self
            .http
            .get(&url)
            .bearer_auth(token.expose_secret())
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReceiptError::PlayApi(format!("HTTP {}: {}", status, body)));
        }

        let play: PlaySubscription = response.json().await?;
        let parse = |value: &str| {
            value
                .parse::<i64>()
                .map_err(|_| ReceiptError::PlayApi(format!("bad timestamp {}", value)))
                .and_then(millis)
        };
        let expiration = parse(&play.expiry_time_millis)?;
        let cancellation = play
            .user_cancellation_time_millis
            .as_deref()
            .map(parse)
            .transpose()?;
        Ok((expiration, cancellation, play.payment_state == Some(2)))
    }
}

#[async_trait]
impl ReceiptValidator for StoreReceiptValidator {
    async fn validate(&self, receipt_type: ReceiptType, data: &str) -> Result<Receipt, ReceiptError> {
        match receipt_type {
            ReceiptType::Ios => self.validate_apple(data).await,
            ReceiptType::Android => self.validate_android(data).await,
            ReceiptType::Stripe => Err(ReceiptError::Unsupported(receipt_type)),
        }
    }
}

fn millis(ms: i64) -> Result<DateTime<Utc>, ReceiptError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| ReceiptError::AndroidFormat(format!("bad timestamp {}", ms)))
}

#[derive(Serialize)]
struct AppleRequest<'a> {
    #[serde(rename = "receipt-data")]
    receipt_data: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<&'a str>,
    #[serde(rename = "exclude-old-transactions")]
    exclude_old_transactions: bool,
}

#[derive(Debug, Deserialize)]
struct AppleResponse {
    status: i64,
    #[serde(default)]
    latest_receipt_info: Vec<AppleTransaction>,
}

#[derive(Debug, Deserialize)]
struct AppleTransaction {
    original_transaction_id: String,
    product_id: String,
    expires_date_ms: Option<String>,
    cancellation_date_ms: Option<String>,
    is_trial_period: Option<String>,
}

impl AppleTransaction {
    fn expires_at_ms(&self) -> i64 {
        self.expires_date_ms
            .as_deref()
            .and_then(|ms| ms.parse().ok())
            .unwrap_or(0)
    }
}

/// The envelope the Android app sends: the purchase JSON and its signature.
#[derive(Debug, Deserialize)]
struct AndroidEnvelope {
    data: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AndroidPurchase {
    pub order_id: String,
    pub package_name: String,
    pub product_id: String,
    pub purchase_time: i64,
    pub purchase_token: String,
}

impl AndroidPurchase {
    /// Renewals carry `..N` after the original order id.
    pub fn subscription_order_id(&self) -> &str {
        self.order_id
            .split_once("..")
            .map(|(base, _)| base)
            .unwrap_or(&self.order_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaySubscription {
    expiry_time_millis: String,
    user_cancellation_time_millis: Option<String>,
    payment_state: Option<i64>,
}

/// Decodes the base64 envelope and checks the RSA-SHA1 signature Google
/// attaches to every purchase.
pub fn verify_android_receipt(public_key: &[u8], data: &str) -> Result<AndroidPurchase, ReceiptError> {
    let raw = STANDARD
        .decode(data.trim())
        .map_err(|e| ReceiptError::AndroidFormat(e.to_string()))?;
    let envelope: AndroidEnvelope =
        serde_json::from_slice(&raw).map_err(|e| ReceiptError::AndroidFormat(e.to_string()))?;
    let signature_bytes = STANDARD
        .decode(envelope.signature.trim())
        .map_err(|e| ReceiptError::AndroidFormat(e.to_string()))?;

    signature::UnparsedPublicKey::new(
        &signature::RSA_PKCS1_2048_8192_SHA1_FOR_LEGACY_USE_ONLY,
        public_key,
    )
    .verify(envelope.data.as_bytes(), &signature_bytes)
    .map_err(|_| ReceiptError::AndroidSignature)?;

    serde_json::from_str(&envelope.data).map_err(|e| ReceiptError::AndroidFormat(e.to_string()))
}

/// Google publishes an X.509 SubjectPublicKeyInfo; ring wants the PKCS#1
/// RSAPublicKey held in its BIT STRING.
pub fn rsa_public_key_from_spki(der: &[u8]) -> Result<&[u8], ReceiptError> {
    let bad = |what: &str| ReceiptError::AndroidFormat(format!("public key: {}", what));

    let (tag, spki, _) = der_element(der).ok_or_else(|| bad("truncated"))?;
    if tag != 0x30 {
        return Err(bad("expected SEQUENCE"));
    }
    let (tag, _, rest) = der_element(spki).ok_or_else(|| bad("truncated algorithm"))?;
    if tag != 0x30 {
        return Err(bad("expected algorithm SEQUENCE"));
    }
    let (tag, bits, _) = der_element(rest).ok_or_else(|| bad("truncated key"))?;
    match (tag, bits.split_first()) {
        (0x03, Some((0, key))) => Ok(key),
        _ => Err(bad("expected BIT STRING")),
    }
}

/// Splits one DER element into (tag, contents, remainder).
fn der_element(input: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let (&tag, rest) = input.split_first()?;
    let (&first, rest) = rest.split_first()?;
    let (len, rest) = if first & 0x80 == 0 {
        (usize::from(first), rest)
    } else {
        let count = usize::from(first & 0x7f);
        if count == 0 || count > 4 || rest.len() < count {
            return None;
        }
        let len = rest[..count]
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        (len, &rest[count..])
    };
    if rest.len() < len {
        return None;
    }
    Some((tag, &rest[..len], &rest[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAY_PUBLIC_KEY: &str = "MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEA4UF4n4omc+rigqCLnQTmrGV8QyxT9JQ8k/GnjzcTQrX4ltQP3vrLEa+kAsQM7ATcCqOUfMtbYx9X5zm+La1m0MD1UO7KRaFdkAqSID6ih/IBSJ1lKnaWe8tD22kqZLUshwkFe2MJ22AWP+mGY7bTWb920pMN6JGW3lnkIs4u0SYkNldNT9ZeNGs2tavHRM34747SOI/85KMDkKGLK1jo4RpXHXyIQ02NPtOuIsQPFOfUCwiCkLkaDLgH++aWox1yHD0EOJpZ7HCiI/m0rCyJRpouaexiFgWDEOlP4Zpwl5LEYp0qkXzC5NPMoxexGSaF6nihOSBdW6YZQPojUm0AhQIDAQAB";

    const PURCHASE: &str = r#"{"orderId":"GPA.3345-1122-9087-55621","packageName":"com.confirmed.tunnels","productId":"com.confirmed.tunnels.monthly","purchaseTime":1522254000000,"purchaseState":0,"purchaseToken":"opaque-token-abc","autoRenewing":true}"#;

    const PURCHASE_SIGNATURE: &str = "J6WN0fCkcvO+bOGghIlg15xAZyQQVdgQAJKLzeOTfhPX+WUIyfurfDCm5egZCrp33a3ptI8VTyFjlnKphC+MufCqCMyRi0QicR59cgYuZDBfVDGwJxmzsGLXKH3VWAAiVhZToteizRUjpQRKi2qUZMIWMFlPOD0QInjxBkpOJ1ZBWPQIgaZ5gV6Afd5vg7stdjQ0aq2lwxAjdxoNHyxP3iKWMKi5T33TEtXAy28MwT02uYur34SHglTGlmK1QmNX/A+pAd9oJpu2MUma+aB/AyRbTCaU/d1n7GxmkTItwgyMVgTgEkO3dcbbeqqsF3rVlHpwFmsJ4vNpm/vxVsiPuw==";

    fn public_key() -> Vec<u8> {
        let der = STANDARD.decode(PLAY_PUBLIC_KEY).unwrap();
        rsa_public_key_from_spki(&der).unwrap().to_vec()
    }

    fn envelope(data: &str, signature: &str) -> String {
        let json = serde_json::json!({ "data": data, "signature": signature });
        STANDARD.encode(json.to_string())
    }

    #[test]
    fn accepts_signed_purchase() {
        let purchase =
            verify_android_receipt(&public_key(), &envelope(PURCHASE, PURCHASE_SIGNATURE)).unwrap();

        assert_eq!(purchase.order_id, "GPA.3345-1122-9087-55621");
        assert_eq!(purchase.product_id, "com.confirmed.tunnels.monthly");
        assert_eq!(purchase.purchase_time, 1522254000000);
    }

    #[test]
    fn rejects_tampered_purchase() {
        let tampered = PURCHASE.replace("monthly", "annual");
        let result = verify_android_receipt(&public_key(), &envelope(&tampered, PURCHASE_SIGNATURE));

        assert!(matches!(result, Err(ReceiptError::AndroidSignature)));
    }

    #[test]
    fn rejects_malformed_envelope() {
        let result = verify_android_receipt(&public_key(), &STANDARD.encode("not json"));
        assert!(matches!(result, Err(ReceiptError::AndroidFormat(_))));

        let result = verify_android_receipt(&public_key(), "%%%");
        assert!(matches!(result, Err(ReceiptError::AndroidFormat(_))));
    }

    #[test]
    fn malformed_public_keys_are_refused() {
        let der = STANDARD.decode(PLAY_PUBLIC_KEY).unwrap();
        for end in 0..der.len() {
            assert!(rsa_public_key_from_spki(&der[..end]).is_err(), "prefix of {end} bytes");
        }

        let mut wrong_tag = der.clone();
        wrong_tag[0] = 0x31;
        assert!(rsa_public_key_from_spki(&wrong_tag).is_err());

        // Indefinite, oversized and overlong length headers.
        for header in [&[0x30, 0x80][..], &[0x30, 0x85, 1, 0, 0, 0, 0], &[0x30, 0x84, 0xff, 0xff, 0xff, 0xff]] {
            assert!(rsa_public_key_from_spki(header).is_err());
        }
    }

    #[test]
    fn renewal_order_ids_collapse() {
        let purchase = AndroidPurchase {
            order_id: "GPA.1234-5678-9012-34567..3".to_string(),
            package_name: "com.confirmed.tunnels".to_string(),
            product_id: "monthly".to_string(),
            purchase_time: 0,
            purchase_token: "t".to_string(),
        };
        assert_eq!(purchase.subscription_order_id(), "GPA.1234-5678-9012-34567");
    }

    #[test]
    fn receipt_errors_map_to_codes() {
        let error: AppError = ReceiptError::AppleStatus(21002).into();
        assert_eq!(error.code, code::APPLE_RESPONSE);
        assert_eq!(error.message, "Error on response from Apple");

        let error: AppError = ReceiptError::AndroidSignature.into();
        assert_eq!(error.code, code::ANDROID_SIGNATURE);

        let error: AppError = ReceiptError::NotConfigured("Google Play").into();
        assert!(error.is_server_error());
    }

    fn apple_validator(server: &wiremock::MockServer) -> StoreReceiptValidator {
        StoreReceiptValidator {
            http: reqwest::Client::new(),
            apple_shared_secret: Some(Secret::new("shared".to_string())),
            apple_verify_url: format!("{}/verifyReceipt", server.uri()),
            apple_sandbox_url: format!("{}/sandbox/verifyReceipt", server.uri()),
            google_public_key: None,
            google_play_api_token: None,
            google_play_api_base: server.uri(),
        }
    }

    #[tokio::test]
    async fn apple_picks_latest_transaction_and_retries_sandbox() {
        use wiremock::matchers::{body_partial_json, method, path};
        use wiremock::{Mock, ResponseTemplate};

        let server = wiremock::MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verifyReceipt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": 21007 })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sandbox/verifyReceipt"))
            .and(body_partial_json(serde_json::json!({
                "receipt-data": "cmVjZWlwdA==",
                "password": "shared"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": 0,
                "latest_receipt_info": [
                    {
                        "original_transaction_id": "1000000",
                        "product_id": "TunnelsiOSUnlimitedMonthly",
                        "expires_date_ms": "1600000000000",
                        "is_trial_period": "false"
                    },
                    {
                        "original_transaction_id": "1000000",
                        "product_id": "TunnelsiOSUnlimitedAnnual",
                        "expires_date_ms": "1700000000000",
                        "is_trial_period": "true"
                    }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = apple_validator(&server)
            .validate(ReceiptType::Ios, "cmVjZWlwdA==")
            .await
            .unwrap();

        assert_eq!(receipt.id, "1000000");
        assert_eq!(receipt.plan_type, PlanType::IosAnnual);
        assert_eq!(receipt.expiration_date.timestamp_millis(), 1_700_000_000_000);
        assert!(receipt.in_trial);
        assert!(receipt.cancellation_date.is_none());
    }

    #[tokio::test]
    async fn apple_failures_surface_status() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, ResponseTemplate};

        let server = wiremock::MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verifyReceipt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": 21002 })))
            .mount(&server)
            .await;

        let result = apple_validator(&server).validate(ReceiptType::Ios, "bad").await;
        assert!(matches!(result, Err(ReceiptError::AppleStatus(21002))));

        let result = apple_validator(&server).validate(ReceiptType::Stripe, "x").await;
        assert!(matches!(result, Err(ReceiptError::Unsupported(ReceiptType::Stripe))));
    }
}
