use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::PgStore;
use crate::models::Subscription;
use crate::repository::SubscriptionRepository;

#[async_trait]
impl SubscriptionRepository for PgStore {
    async fn upsert_subscription(&self, s: &Subscription) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                receipt_id, user_id, receipt_type, plan_type, expiration_date,
                cancellation_date, in_trial, failed_last_check, receipt_data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (receipt_id) DO UPDATE
            SET
                user_id = EXCLUDED.user_id,
                plan_type = EXCLUDED.plan_type,
                expiration_date = EXCLUDED.expiration_date,
                cancellation_date = EXCLUDED.cancellation_date,
                in_trial = EXCLUDED.in_trial,
                failed_last_check = EXCLUDED.failed_last_check,
                receipt_data = COALESCE(EXCLUDED.receipt_data, subscriptions.receipt_data),
                updated_at = NOW()
            "#,
        )
        .bind(&s.receipt_id)
        .bind(s.user_id)
        .bind(s.receipt_type.as_str())
        .bind(s.plan_type.as_str())
        .bind(s.expiration_date)
        .bind(s.cancellation_date)
        .bind(s.in_trial)
        .bind(s.failed_last_check)
        .bind(&s.receipt_data)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_subscription(&self, receipt_id: &str) -> anyhow::Result<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions WHERE receipt_id = $1
            "#,
        )
        .bind(receipt_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn list_subscriptions(&self, user_id: Uuid) -> anyhow::Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = $1
            ORDER BY expiration_date DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(subscriptions)
    }

    async fn list_refreshable(
        &self,
        expired_after: DateTime<Utc>,
        limit: i64,
    ) -> anyhow::Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT * FROM subscriptions
            WHERE receipt_type IN ('ios', 'android')
              AND receipt_data IS NOT NULL
              AND cancellation_date IS NULL
              AND expiration_date > $1
              AND expiration_date <= NOW()
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(expired_after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(subscriptions)
    }
}
