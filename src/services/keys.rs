//! Device key issuance. Each user gets one Ed25519 key pair, generated on the
//! first entitled request and reused afterwards.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::{Certificate, KeyBundle, Platform, User};
use crate::repository::Store;
use crate::services::encryption::{self, derive_key, Cipher, EncryptionError};
use crate::services::subscriptions::{check_entitlement, SubscriptionService};

const KEY_ID_BYTES: usize = 8;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct KeyPayload<'a> {
    key_id: &'a str,
    private_key: String,
    public_key: &'a str,
    signature: &'a str,
}

#[derive(Clone)]
pub struct KeyService {
    store: Arc<dyn Store>,
    subscriptions: SubscriptionService,
    cipher: Arc<Cipher>,
    signing_key: [u8; 32],
}

impl KeyService {
    pub fn new(
        store: Arc<dyn Store>,
        subscriptions: SubscriptionService,
        key_signing_secret: &str,
    ) -> std::result::Result<Self, EncryptionError> {
        Ok(Self {
            store,
            subscriptions,
            cipher: Arc::new(Cipher::new(&derive_key(&format!("seal:{}", key_signing_secret)))?),
            signing_key: derive_key(&format!("sign:{}", key_signing_secret)),
        })
    }

    /// Returns the user's device key if their subscriptions cover `platform`.
    pub async fn get_key(&self, user: &User, platform: Platform) -> Result<KeyBundle> {
        let active = self.subscriptions.list_active(user.id).await?;
        check_entitlement(&active, platform, Utc::now())?;

        let certificate = match self.store.find_certificate(user.id).await? {
            Some(existing) => existing,
            None => self.issue(user).await?,
        };

        let payload = KeyPayload {
            key_id: &certificate.key_id,
            private_key: STANDARD.encode(self.cipher.open(&certificate.private_key_encrypted)?),
            public_key: &certificate.public_key,
            signature: &certificate.signature,
        };
        let json = serde_json::to_vec(&payload)
            .map_err(|e| AppError::internal(format!("Key serialization failed: {}", e)))?;

        tracing::debug!(user_id = %user.id, platform = %platform, "Issued device key");
        Ok(KeyBundle {
            id: user.id,
            b64: STANDARD.encode(json),
        })
    }

    async fn issue(&self, user: &User) -> Result<Certificate> {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng)
            .map_err(|_| AppError::internal("Key generation failed"))?;
        let pair = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref())
            .map_err(|e| AppError::internal(format!("Generated key rejected: {}", e)))?;

        let key_id = encryption::random_hex(KEY_ID_BYTES)?;
        let public_key = STANDARD.encode(pair.public_key().as_ref());
        let certificate = Certificate {
            user_id: user.id,
            signature: encryption::keyed_hash(
                &self.signing_key,
                &signature_input(&key_id, user, &public_key),
            ),
            key_id,
            private_key_encrypted: self.cipher.seal(pkcs8.as_ref())?,
            public_key,
            created_at: Utc::now(),
        };

        if let Err(e) = self.store.insert_certificate(&certificate).await {
            // A concurrent request for the same user may have won the insert.
            return match self.store.find_certificate(user.id).await? {
                Some(existing) => Ok(existing),
                None => Err(e.into()),
            };
        }

        tracing::info!(user_id = %user.id, key_id = %certificate.key_id, "Generated device key");
        Ok(certificate)
    }

    /// True if `certificate` carries a signature made with this service's key.
    pub fn verify(&self, certificate: &Certificate, user: &User) -> bool {
        encryption::verify_keyed_hash(
            &self.signing_key,
            &signature_input(&certificate.key_id, user, &certificate.public_key),
            &certificate.signature,
        )
    }
}

fn signature_input(key_id: &str, user: &User, public_key: &str) -> String {
    format!("{}:{}:{}", key_id, user.id, public_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewUser, PlanType, Receipt, ReceiptType};
    use crate::repository::MemoryStore;
    use crate::services::receipts::{ReceiptError, ReceiptValidator};
    use crate::services::stripe::{Billing, NewStripeSubscription, StripeError, StripeSubscription};
    use crate::models::{Charge, Invoice, PaymentMethod};
    use async_trait::async_trait;
    use chrono::Duration;
    use uuid::Uuid;

    struct NoBilling;

    #[async_trait]
    impl Billing for NoBilling {
        async fn create_customer(&self, _: Uuid, _: Option<&str>) -> std::result::Result<String, StripeError> {
            unimplemented!()
        }
        async fn payment_methods(&self, _: &str) -> std::result::Result<Vec<PaymentMethod>, StripeError> {
            unimplemented!()
        }
        async fn invoices(&self, _: &str) -> std::result::Result<Vec<Invoice>, StripeError> {
            unimplemented!()
        }
        async fn charges(&self, _: &str) -> std::result::Result<Vec<Charge>, StripeError> {
            unimplemented!()
        }
        async fn add_source(&self, _: &str, _: &str) -> std::result::Result<String, StripeError> {
            unimplemented!()
        }
        async fn set_default_source(&self, _: &str, _: &str) -> std::result::Result<(), StripeError> {
            unimplemented!()
        }
        async fn delete_source(&self, _: &str, _: &str) -> std::result::Result<(), StripeError> {
            unimplemented!()
        }
        async fn create_subscription(
            &self,
            _: NewStripeSubscription,
        ) -> std::result::Result<StripeSubscription, StripeError> {
            unimplemented!()
        }
        async fn cancel_subscription(&self, _: &str) -> std::result::Result<(), StripeError> {
            unimplemented!()
        }
    }

    struct NoReceipts;

    #[async_trait]
    impl ReceiptValidator for NoReceipts {
        async fn validate(&self, _: ReceiptType, _: &str) -> std::result::Result<Receipt, ReceiptError> {
            Err(ReceiptError::NotConfigured("test"))
        }
    }

    async fn setup() -> (KeyService, SubscriptionService, User) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let subscriptions =
            SubscriptionService::new(store.clone(), Arc::new(NoBilling), Arc::new(NoReceipts));
        let user = store
            .create_user(NewUser {
                referral_code: "keyuser1".to_string(),
                do_not_email_code: "x".repeat(16),
                ..NewUser::default()
            })
            .await
            .unwrap();
        let keys = KeyService::new(store, subscriptions.clone(), "signing-secret").unwrap();
        (keys, subscriptions, user)
    }

    fn receipt(plan_type: PlanType) -> Receipt {
        Receipt {
            id: "1000000123".to_string(),
            receipt_type: ReceiptType::Ios,
            plan_type,
            expiration_date: Utc::now() + Duration::days(30),
            cancellation_date: None,
            in_trial: false,
            data: None,
        }
    }

    #[tokio::test]
    async fn key_is_stable_and_signed() {
        let (keys, subscriptions, user) = setup().await;
        subscriptions
            .update_with_receipt(user.id, &receipt(PlanType::AllMonthly))
            .await
            .unwrap();

        let first = keys.get_key(&user, Platform::Mac).await.unwrap();
        let second = keys.get_key(&user, Platform::Ios).await.unwrap();
        assert_eq!(first.id, user.id);
        assert_eq!(first.b64, second.b64);

        let decoded: serde_json::Value =
            serde_json::from_slice(&STANDARD.decode(&first.b64).unwrap()).unwrap();
        assert!(decoded["keyId"].is_string());
        assert!(decoded["privateKey"].is_string());

        let certificate = keys.store.find_certificate(user.id).await.unwrap().unwrap();
        assert!(keys.verify(&certificate, &user));
        assert_ne!(
            certificate.private_key_encrypted,
            STANDARD.decode(decoded["privateKey"].as_str().unwrap()).unwrap()
        );
    }

    #[tokio::test]
    async fn no_key_without_subscription() {
        let (keys, _, user) = setup().await;

        let error = keys.get_key(&user, Platform::Windows).await.unwrap_err();
        assert_eq!(error.code, crate::error::code::NO_ACTIVE_SUBSCRIPTIONS);
        assert!(keys.store.find_certificate(user.id).await.unwrap().is_none());
    }
}
