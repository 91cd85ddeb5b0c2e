use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use tower_sessions::Session;
use uuid::Uuid;

use super::session::session_user_id;
use crate::api::state::AppState;
use crate::error::{AppError, Result};
use crate::models::User;

const SESSION_INVALID: &str = "Session expired or invalid. Please sign in again.";
const SESSION_INVALID_USER: &str = "Session expired or invalid. Please sign in.";

async fn session_from_parts<S: Send + Sync>(parts: &mut Parts, state: &S) -> Result<Session> {
    Session::from_request_parts(parts, state)
        .await
        .map_err(|(_, message)| AppError::internal(message))
}

/// Middleware that requires a signed-in session before anything else runs.
pub async fn require_session(session: Session, request: Request, next: Next) -> Result<Response> {
    if session_user_id(&session).await?.is_none() {
        return Err(AppError::unauthorized(SESSION_INVALID));
    }
    Ok(next.run(request).await)
}

/// The signed-in user's id, without loading the user.
#[derive(Debug, Clone, Copy)]
pub struct SessionUser {
    pub user_id: Uuid,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let session = session_from_parts(parts, state).await?;
        let user_id = session_user_id(&session)
            .await?
            .ok_or_else(|| AppError::unauthorized(SESSION_INVALID))?;
        Ok(Self { user_id })
    }
}

/// The signed-in user, loaded from the store.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        if let Some(user) = parts.extensions.get::<CurrentUser>() {
            return Ok(user.clone());
        }

        let session = session_from_parts(parts, state).await?;
        let user_id = session_user_id(&session)
            .await?
            .ok_or_else(|| AppError::unauthorized(SESSION_INVALID_USER))?;
        let user = state
            .accounts
            .find(user_id)
            .await?
            .ok_or_else(|| AppError::unauthorized(SESSION_INVALID_USER))?;

        let current = CurrentUser(user);
        parts.extensions.insert(current.clone());
        Ok(current)
    }
}

/// Middleware form of [`CurrentUser`], for routes where the user must be
/// loaded before other middleware runs.
pub async fn require_user(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let (mut parts, body) = request.into_parts();
    CurrentUser::from_request_parts(&mut parts, &state).await?;
    Ok(next.run(Request::from_parts(parts, body)).await)
}
