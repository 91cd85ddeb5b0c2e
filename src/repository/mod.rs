//! Storage ports. Services only ever see these traits; `db::PgStore` backs
//! them in production and `memory::MemoryStore` in tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Certificate, NewUser, Subscription, User};

pub mod memory;

pub use memory::MemoryStore;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create_user(&self, user: NewUser) -> anyhow::Result<User>;

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;

    async fn find_by_email_hash(&self, email_hash: &str) -> anyhow::Result<Option<User>>;

    /// Finds the user that requested a change to `email_hash`.
    async fn find_by_pending_email_hash(&self, email_hash: &str) -> anyhow::Result<Option<User>>;

    async fn find_by_referral_code(&self, code: &str) -> anyhow::Result<Option<User>>;

    async fn find_by_reset_code(&self, code: &str) -> anyhow::Result<Option<User>>;

    async fn list_referred(&self, referrer: Uuid) -> anyhow::Result<Vec<User>>;

    /// Persists every mutable field of `user` and bumps `updated_at`.
    async fn update_user(&self, user: &User) -> anyhow::Result<()>;
}

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Inserts or replaces the subscription keyed by `receipt_id`.
    async fn upsert_subscription(&self, subscription: &Subscription) -> anyhow::Result<()>;

    async fn find_subscription(&self, receipt_id: &str) -> anyhow::Result<Option<Subscription>>;

    /// All subscriptions of a user, newest expiration first.
    async fn list_subscriptions(&self, user_id: Uuid) -> anyhow::Result<Vec<Subscription>>;

    /// Store subscriptions with receipt data that expired after `expired_after`.
    async fn list_refreshable(
        &self,
        expired_after: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<Subscription>>;
}

#[async_trait]
pub trait CertificateRepository: Send + Sync {
    async fn find_certificate(&self, user_id: Uuid) -> anyhow::Result<Option<Certificate>>;

    async fn insert_certificate(&self, certificate: &Certificate) -> anyhow::Result<()>;
}

/// Everything the services need from storage.
pub trait Store: UserRepository + SubscriptionRepository + CertificateRepository {}

impl<T> Store for T where T: UserRepository + SubscriptionRepository + CertificateRepository {}
