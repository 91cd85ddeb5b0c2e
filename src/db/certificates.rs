use async_trait::async_trait;
use uuid::Uuid;

use super::PgStore;
use crate::models::Certificate;
use crate::repository::CertificateRepository;

#[async_trait]
impl CertificateRepository for PgStore {
    async fn find_certificate(&self, user_id: Uuid) -> anyhow::Result<Option<Certificate>> {
        let certificate = sqlx::query_as::<_, Certificate>(
            r#"
            SELECT * FROM certificates WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(certificate)
    }

    async fn insert_certificate(&self, c: &Certificate) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO certificates (user_id, key_id, private_key_encrypted, public_key, signature)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(c.user_id)
        .bind(&c.key_id)
        .bind(&c.private_key_encrypted)
        .bind(&c.public_key)
        .bind(&c.signature)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
