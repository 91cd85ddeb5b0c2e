//! Turns handler errors into the response the client asked for.

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde_json::json;
use tower_sessions::Session;

use super::flash::{flash_redirect, Flash, FlashKind};
use crate::api::negotiate::wants_json;
use crate::api::notification::NotificationTemplate;
use crate::error::{code, AppError, UNKNOWN_INTERNAL_ERROR};

pub const PAGE_NOT_FOUND: &str = "The page you are looking for does not exist.";

fn log_error(error: &AppError, path: &str) {
    if error.is_server_error() {
        tracing::error!(
            path,
            status = error.status.as_u16(),
            code = error.code,
            message = %error.message,
            detail = error.detail.as_deref().unwrap_or(""),
            "Request failed"
        );
    } else if error.status == StatusCode::NOT_FOUND {
        tracing::info!(path, message = %error.message, "Not found");
    } else {
        tracing::debug!(path, status = error.status.as_u16(), code = error.code, message = %error.message, "Request rejected");
    }
}

/// Re-renders any [`AppError`] a handler or inner middleware produced.
///
/// JSON clients get the `{code, message}` envelope. Browsers are sent to
/// sign in on 401, to `/resend-confirm-code` on code 1, back to the page
/// with a flash message for other client errors, and to the notification
/// page for everything else.
pub async fn negotiate_errors(session: Session, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let json = wants_json(request.headers());

    let response = next.run(request).await;
    let Some(error) = response.extensions().get::<AppError>().cloned() else {
        return response;
    };
    log_error(&error, uri.path());

    if json {
        let (status, body) = error.public_json();
        return (status, Json(body)).into_response();
    }

    let current = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let redirected = if error.status == StatusCode::UNAUTHORIZED {
        let target = if uri.path().starts_with("/signin") { current } else { "/signin" };
        flash_redirect(&session, &method, &uri, FlashKind::Error, &error.message, target).await
    } else if !error.is_server_error() {
        if error.code == code::EMAIL_NOT_CONFIRMED {
            return Redirect::to("/resend-confirm-code").into_response();
        }
        flash_redirect(&session, &method, &uri, FlashKind::Error, &error.message, current).await
    } else {
        return NotificationTemplate::page(
            StatusCode::INTERNAL_SERVER_ERROR,
            Flash::with(FlashKind::Error, UNKNOWN_INTERNAL_ERROR),
        );
    };

    redirected.unwrap_or_else(|e| {
        tracing::error!(error = %e, detail = ?e.detail, "Couldn't store flash message");
        NotificationTemplate::page(
            StatusCode::INTERNAL_SERVER_ERROR,
            Flash::with(FlashKind::Error, UNKNOWN_INTERNAL_ERROR),
        )
    })
}

/// Fallback for unmatched routes.
pub async fn not_found(headers: HeaderMap, request_uri: axum::http::Uri) -> Response {
    tracing::info!(path = %request_uri, "404 NOT FOUND");
    if wants_json(&headers) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "code": code::NOT_FOUND, "message": "Not Found" })),
        )
            .into_response();
    }
    NotificationTemplate::page(StatusCode::NOT_FOUND, Flash::with(FlashKind::Error, PAGE_NOT_FOUND))
}
