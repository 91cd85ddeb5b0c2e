use axum::{
    body::{self, Body},
    extract::Request,
    http::{header, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use tower_sessions::Session;

use super::session::SESSION_KEY_CSRF_TOKEN;
use crate::api::params::Params;
use crate::error::{code, AppError, Result};
use crate::services::encryption;

const TOKEN_LEN: usize = 32;
const TOKEN_HEADERS: [&str; 4] = ["csrf-token", "xsrf-token", "x-csrf-token", "x-xsrf-token"];

/// The session's token, created on first use.
pub async fn csrf_token(session: &Session) -> Result<String> {
    if let Some(token) = session.get::<String>(SESSION_KEY_CSRF_TOKEN).await? {
        return Ok(token);
    }
    let token = encryption::random_alphanumeric(TOKEN_LEN)?;
    session.insert(SESSION_KEY_CSRF_TOKEN, &token).await?;
    Ok(token)
}

fn invalid_token() -> AppError {
    AppError::new(StatusCode::FORBIDDEN, code::INVALID_CSRF, "invalid csrf token")
}

/// Rejects state-changing requests that don't echo the session's token in
/// a header or in the `_csrf` field.
pub async fn verify_csrf(session: Session, request: Request, next: Next) -> Result<Response> {
    if matches!(*request.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
        csrf_token(&session).await?;
        return Ok(next.run(request).await);
    }

    let expected = session
        .get::<String>(SESSION_KEY_CSRF_TOKEN)
        .await?
        .ok_or_else(invalid_token)?;

    let from_header = TOKEN_HEADERS
        .iter()
        .find_map(|name| request.headers().get(*name))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // The body has to be buffered to look for `_csrf`, then handed on intact.
    let (parts, body) = request.into_parts();
    let bytes = body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| AppError::validation(format!("Invalid request body: {}", e)))?;

    let submitted = match from_header {
        Some(token) => Some(token),
        None => {
            let content_type = parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            Params::parse(&parts.uri, content_type, &bytes)?
                .get("_csrf")
                .map(str::to_string)
        }
    };

    if submitted.as_deref() != Some(expected.as_str()) {
        return Err(invalid_token());
    }

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}
