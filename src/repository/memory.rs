//! In-memory store used by the integration tests and for running without a
//! database. Data is lost on process restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CertificateRepository, SubscriptionRepository, UserRepository};
use crate::models::{Certificate, NewUser, Subscription, User};

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    certificates: RwLock<HashMap<Uuid, Certificate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn find_user<F>(&self, predicate: F) -> Option<User>
    where
        F: Fn(&User) -> bool,
    {
        let users = self.users.read().await;
        users.values().find(|u| predicate(u)).cloned()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, new_user: NewUser) -> anyhow::Result<User> {
        let mut users = self.users.write().await;

        if let Some(hash) = &new_user.email_hash {
            if users.values().any(|u| u.email_hash.as_ref() == Some(hash)) {
                anyhow::bail!("duplicate email hash");
            }
        }
        if users
            .values()
            .any(|u| u.referral_code == new_user.referral_code)
        {
            anyhow::bail!("duplicate referral code");
        }

        let user = new_user.into_user(Uuid::new_v4(), Utc::now());
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email_hash(&self, email_hash: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .find_user(|u| u.email_hash.as_deref() == Some(email_hash))
            .await)
    }

    async fn find_by_pending_email_hash(&self, email_hash: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .find_user(|u| u.pending_email_hash.as_deref() == Some(email_hash))
            .await)
    }

    async fn find_by_referral_code(&self, code: &str) -> anyhow::Result<Option<User>> {
        Ok(self.find_user(|u| u.referral_code == code).await)
    }

    async fn find_by_reset_code(&self, code: &str) -> anyhow::Result<Option<User>> {
        Ok(self
            .find_user(|u| u.password_reset_code.as_deref() == Some(code))
            .await)
    }

    async fn list_referred(&self, referrer: Uuid) -> anyhow::Result<Vec<User>> {
        let users = self.users.read().await;
        let mut referred: Vec<User> = users
            .values()
            .filter(|u| u.referred_by == Some(referrer))
            .cloned()
            .collect();
        referred.sort_by_key(|u| u.created_at);
        Ok(referred)
    }

    async fn update_user(&self, user: &User) -> anyhow::Result<()> {
        let mut users = self.users.write().await;

        if let Some(hash) = &user.email_hash {
            if users
                .values()
                .any(|u| u.id != user.id && u.email_hash.as_ref() == Some(hash))
            {
                anyhow::bail!("duplicate email hash");
            }
        }

        let stored = users
            .get_mut(&user.id)
            .ok_or_else(|| anyhow::anyhow!("user {} not found", user.id))?;
        *stored = User {
            updated_at: Utc::now(),
            ..user.clone()
        };
        Ok(())
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn upsert_subscription(&self, subscription: &Subscription) -> anyhow::Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        let created_at = subscriptions
            .get(&subscription.receipt_id)
            .map(|s| s.created_at)
            .unwrap_or(subscription.created_at);

        subscriptions.insert(
            subscription.receipt_id.clone(),
            Subscription {
                created_at,
                updated_at: Utc::now(),
                ..subscription.clone()
            },
        );
        Ok(())
    }

    async fn find_subscription(&self, receipt_id: &str) -> anyhow::Result<Option<Subscription>> {
        Ok(self.subscriptions.read().await.get(receipt_id).cloned())
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> anyhow::Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        let mut found: Vec<Subscription> = subscriptions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.expiration_date.cmp(&a.expiration_date));
        Ok(found)
    }

    async fn list_refreshable(
        &self,
        expired_after: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<Subscription>> {
        let subscriptions = self.subscriptions.read().await;
        let mut found: Vec<Subscription> = subscriptions
            .values()
            .filter(|s| {
                s.receipt_type.is_store()
                    && s.receipt_data.is_some()
                    && s.cancellation_date.is_none()
                    && s.expiration_date > expired_after
                    && s.expiration_date <= Utc::now()
            })
            .cloned()
            .collect();
        found.sort_by_key(|s| s.updated_at);
        found.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(found)
    }
}

#[async_trait]
impl CertificateRepository for MemoryStore {
    async fn find_certificate(&self, user_id: Uuid) -> anyhow::Result<Option<Certificate>> {
        Ok(self.certificates.read().await.get(&user_id).cloned())
    }

    async fn insert_certificate(&self, certificate: &Certificate) -> anyhow::Result<()> {
        let mut certificates = self.certificates.write().await;
        if certificates.contains_key(&certificate.user_id) {
            anyhow::bail!("certificate already exists for user {}", certificate.user_id);
        }
        certificates.insert(certificate.user_id, certificate.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlanType, ReceiptType};
    use chrono::Duration;

    fn new_user(email_hash: &str, referral_code: &str) -> NewUser {
        NewUser {
            email_hash: Some(email_hash.to_string()),
            referral_code: referral_code.to_string(),
            do_not_email_code: "abcdef0123456789".to_string(),
            ..NewUser::default()
        }
    }

    #[tokio::test]
    async fn email_hash_is_unique() {
        let store = MemoryStore::new();
        store.create_user(new_user("hash-a", "aaaa1111")).await.unwrap();

        assert!(store.create_user(new_user("hash-a", "bbbb2222")).await.is_err());
        assert!(store
            .find_by_email_hash("hash-a")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn refreshable_subscriptions_are_recently_expired_store_receipts() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("hash-b", "cccc3333")).await.unwrap();
        let now = Utc::now();

        let template = Subscription {
            receipt_id: String::new(),
            user_id: user.id,
            receipt_type: ReceiptType::Ios,
            plan_type: PlanType::IosMonthly,
            expiration_date: now - Duration::days(2),
            cancellation_date: None,
            in_trial: false,
            failed_last_check: false,
            receipt_data: Some("cmVjZWlwdA==".to_string()),
            created_at: now,
            updated_at: now,
        };

        let stale = Subscription {
            receipt_id: "stale".to_string(),
            ..template.clone()
        };
        let active = Subscription {
            receipt_id: "active".to_string(),
            expiration_date: now + Duration::days(2),
            ..template.clone()
        };
        let stripe = Subscription {
            receipt_id: "sub_123".to_string(),
            receipt_type: ReceiptType::Stripe,
            plan_type: PlanType::AllMonthly,
            receipt_data: None,
            ..template.clone()
        };
        for s in [&stale, &active, &stripe] {
            store.upsert_subscription(s).await.unwrap();
        }

        let found = store
            .list_refreshable(now - Duration::days(30), 100)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].receipt_id, "stale");
    }
}
