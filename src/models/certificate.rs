use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// A device key pair issued to a user. The private key is kept sealed and
/// only opened when handing the key to an entitled device.
#[derive(Debug, Clone, FromRow)]
pub struct Certificate {
    pub user_id: Uuid,
    pub key_id: String,
    pub private_key_encrypted: Vec<u8>,
    pub public_key: String,
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

/// What `/get-key` returns to the client.
#[derive(Debug, Clone, Serialize)]
pub struct KeyBundle {
    pub id: Uuid,
    pub b64: String,
}
