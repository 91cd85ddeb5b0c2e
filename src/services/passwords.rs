//! Argon2 password hashing. Hashing is CPU bound, so both calls run on the
//! blocking pool.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::AppError;

pub async fn hash_password(password: &str) -> Result<String, AppError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AppError::internal(format!("Password hashing failed: {}", e)))
    })
    .await
    .map_err(AppError::internal)?
}

/// False for a wrong password and for unparseable stored hashes.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let password = password.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || match PasswordHash::new(&hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored password hash is unreadable");
            false
        }
    })
    .await
    .map_err(AppError::internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_and_verify() {
        let hash = hash_password("TestPassword1!").await.unwrap();

        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("TestPassword1!", &hash).await.unwrap());
        assert!(!verify_password("TestPassword2!", &hash).await.unwrap());
        assert!(!verify_password("TestPassword1!", "not-a-hash").await.unwrap());
    }
}
