use async_trait::async_trait;
use uuid::Uuid;

use super::PgStore;
use crate::models::{NewUser, User};
use crate::repository::UserRepository;

#[async_trait]
impl UserRepository for PgStore {
    async fn create_user(&self, data: NewUser) -> anyhow::Result<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (
                email_hash, email_encrypted, email_confirm_code, password_hash,
                referral_code, referred_by, partner_campaign, do_not_email_code, lockdown
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(&data.email_hash)
        .bind(&data.email_encrypted)
        .bind(&data.email_confirm_code)
        .bind(&data.password_hash)
        .bind(&data.referral_code)
        .bind(data.referred_by)
        .bind(&data.partner_campaign)
        .bind(&data.do_not_email_code)
        .bind(data.lockdown)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_email_hash(&self, email_hash: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users WHERE email_hash = $1
            "#,
        )
        .bind(email_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_pending_email_hash(&self, email_hash: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE pending_email_hash = $1
            ORDER BY updated_at DESC
            LIMIT 1
            "#,
        )
        .bind(email_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_referral_code(&self, code: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users WHERE referral_code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn find_by_reset_code(&self, code: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users WHERE password_reset_code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn list_referred(&self, referrer: Uuid) -> anyhow::Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE referred_by = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(referrer)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    async fn update_user(&self, user: &User) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET
                email_hash = $2,
                email_encrypted = $3,
                email_confirmed = $4,
                email_confirm_code = $5,
                pending_email_hash = $6,
                pending_email_encrypted = $7,
                password_hash = $8,
                password_reset_code = $9,
                password_reset_expires_at = $10,
                stripe_id = $11,
                do_not_email = $12,
                partner_campaign = $13,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.email_hash)
        .bind(&user.email_encrypted)
        .bind(user.email_confirmed)
        .bind(&user.email_confirm_code)
        .bind(&user.pending_email_hash)
        .bind(&user.pending_email_encrypted)
        .bind(&user.password_hash)
        .bind(&user.password_reset_code)
        .bind(user.password_reset_expires_at)
        .bind(&user.stripe_id)
        .bind(user.do_not_email)
        .bind(&user.partner_campaign)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
