use ring::digest;
use sqlx::PgPool;
use tower_sessions::{
    cookie::{Key, SameSite},
    service::SignedCookie,
    Expiry, Session, SessionManagerLayer, SessionStore,
};
use tower_sessions_sqlx_store::PostgresStore;
use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;

/// Session keys used in the application
pub const SESSION_COOKIE: &str = "confirmedid";
pub const SESSION_KEY_USER_ID: &str = "user_id";
pub const SESSION_KEY_CSRF_TOKEN: &str = "csrf_token";
pub const SESSION_KEY_FLASH: &str = "flash";

const SESSION_INACTIVITY_HOURS: i64 = 2;

/// PostgreSQL backed session store, with its table created on first use.
pub async fn create_session_store(pool: PgPool) -> std::result::Result<PostgresStore, sqlx::Error> {
    let store = PostgresStore::new(pool);
    store.migrate().await?;
    Ok(store)
}

/// Builds the cookie session layer over any store.
pub fn session_layer<S: SessionStore + Clone>(
    store: S,
    config: &Config,
) -> SessionManagerLayer<S, SignedCookie> {
    use secrecy::ExposeSecret;

    // Cookie keys need 64 bytes; SHA-512 stretches any configured secret to fit.
    let key_material = digest::digest(&digest::SHA512, config.session_secret.expose_secret().as_bytes());

    let mut layer = SessionManagerLayer::new(store)
        .with_name(SESSION_COOKIE)
        .with_http_only(true)
        .with_same_site(SameSite::Strict)
        .with_expiry(Expiry::OnInactivity(time::Duration::hours(SESSION_INACTIVITY_HOURS)))
        .with_signed(Key::from(key_material.as_ref()))
        .with_secure(config.is_production());

    if config.is_production() {
        layer = layer.with_domain(config.domain.clone());
    }
    layer
}

/// Starts an authenticated session under a fresh id.
pub async fn sign_in(session: &Session, user_id: Uuid) -> Result<()> {
    session.cycle_id().await?;
    session.insert(SESSION_KEY_USER_ID, user_id).await?;
    Ok(())
}

/// Deletes the session. A session that is already gone is not an error.
pub async fn sign_out(session: &Session) {
    if let Err(e) = session.flush().await {
        tracing::error!(error = %e, "Couldn't delete session");
    }
}

pub async fn session_user_id(session: &Session) -> Result<Option<Uuid>> {
    Ok(session.get::<Uuid>(SESSION_KEY_USER_ID).await?)
}
