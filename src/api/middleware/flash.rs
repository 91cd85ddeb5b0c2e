//! One-shot messages carried across a redirect in the session.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{request::Parts, Method, Uri},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use super::session::SESSION_KEY_FLASH;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashKind {
    Error,
    Info,
    Success,
}

/// Messages to show on the next rendered page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Flash {
    pub error: Vec<String>,
    pub info: Vec<String>,
    pub success: Vec<String>,
}

impl Flash {
    pub fn with(kind: FlashKind, message: impl Into<String>) -> Self {
        let mut flash = Self::default();
        flash.push(kind, message);
        flash
    }

    pub fn push(&mut self, kind: FlashKind, message: impl Into<String>) {
        let bucket = match kind {
            FlashKind::Error => &mut self.error,
            FlashKind::Info => &mut self.info,
            FlashKind::Success => &mut self.success,
        };
        bucket.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.error.is_empty() && self.info.is_empty() && self.success.is_empty()
    }
}

/// Moves any stored messages out of the session and into the request, so
/// each message is shown exactly once.
pub async fn load_flash(session: Session, mut request: Request, next: Next) -> Response {
    let flash = match session.get::<Flash>(SESSION_KEY_FLASH).await {
        Ok(Some(flash)) => {
            if let Err(e) = session.remove::<Flash>(SESSION_KEY_FLASH).await {
                tracing::warn!(error = %e, "Couldn't clear flash messages");
            }
            flash
        }
        Ok(None) => Flash::default(),
        Err(e) => {
            tracing::warn!(error = %e, "Couldn't load flash messages");
            Flash::default()
        }
    };
    request.extensions_mut().insert(flash);
    next.run(request).await
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Flash {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Flash>().cloned().unwrap_or_default())
    }
}

/// Stores `message` and redirects to `target`.
///
/// A GET that would redirect to its own URL goes to the same path without
/// the query string instead, or to `/notification` when there is none.
pub async fn flash_redirect(
    session: &Session,
    method: &Method,
    uri: &Uri,
    kind: FlashKind,
    message: &str,
    target: &str,
) -> Result<Response> {
    let mut stored = session
        .get::<Flash>(SESSION_KEY_FLASH)
        .await?
        .unwrap_or_default();
    stored.push(kind, message);
    session.insert(SESSION_KEY_FLASH, stored).await?;

    let current = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let location = if method == Method::GET && target == current {
        if uri.query().is_some() {
            uri.path()
        } else {
            "/notification"
        }
    } else {
        target
    };
    Ok(Redirect::to(location).into_response())
}

/// Extractor bundling what a handler needs to flash-redirect.
pub struct Flasher {
    session: Session,
    method: Method,
    uri: Uri,
}

impl Flasher {
    pub async fn redirect(&self, kind: FlashKind, message: &str, target: &str) -> Result<Response> {
        flash_redirect(&self.session, &self.method, &self.uri, kind, message, target).await
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Flasher {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, message)| AppError::internal(message))?;
        Ok(Self {
            session,
            method: parts.method.clone(),
            uri: parts.uri.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;
    use std::sync::Arc;
    use tower_sessions::MemoryStore;

    fn session() -> Session {
        Session::new(None, Arc::new(MemoryStore::default()), None)
    }

    fn location(response: &Response) -> &str {
        response.headers()[header::LOCATION].to_str().unwrap()
    }

    #[tokio::test]
    async fn redirect_to_self_strips_query() {
        let session = session();
        let uri: Uri = "/reset-password?code=abc".parse().unwrap();

        let response = flash_redirect(&session, &Method::GET, &uri, FlashKind::Error, "Invalid reset code.", "/reset-password?code=abc")
            .await
            .unwrap();
        assert_eq!(location(&response), "/reset-password");

        let stored: Flash = session.get(SESSION_KEY_FLASH).await.unwrap().unwrap();
        assert_eq!(stored.error, vec!["Invalid reset code.".to_string()]);
    }

    #[tokio::test]
    async fn redirect_to_self_without_query_goes_to_notification() {
        let session = session();
        let uri: Uri = "/account".parse().unwrap();

        let response = flash_redirect(&session, &Method::GET, &uri, FlashKind::Error, "oops", "/account")
            .await
            .unwrap();
        assert_eq!(location(&response), "/notification");
    }

    #[tokio::test]
    async fn posts_redirect_where_asked() {
        let session = session();
        let uri: Uri = "/change-email".parse().unwrap();

        let response = flash_redirect(&session, &Method::POST, &uri, FlashKind::Info, "sent", "/change-email")
            .await
            .unwrap();
        assert_eq!(location(&response), "/change-email");
    }

    #[tokio::test]
    async fn messages_accumulate_until_loaded() {
        let session = session();
        let uri: Uri = "/signin".parse().unwrap();

        flash_redirect(&session, &Method::POST, &uri, FlashKind::Info, "one", "/signin").await.unwrap();
        flash_redirect(&session, &Method::POST, &uri, FlashKind::Success, "two", "/signin").await.unwrap();

        let stored: Flash = session.get(SESSION_KEY_FLASH).await.unwrap().unwrap();
        assert_eq!(stored.info, vec!["one".to_string()]);
        assert_eq!(stored.success, vec!["two".to_string()]);
    }
}
