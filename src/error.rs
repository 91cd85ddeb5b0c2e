use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error codes carried in the `{code, message}` envelope.
pub mod code {
    pub const UNKNOWN: i64 = -1;
    pub const EMAIL_NOT_CONFIRMED: i64 = 1;
    pub const UNAUTHORIZED: i64 = 2;
    pub const VALIDATION: i64 = 3;
    pub const TOO_MANY_REQUESTS: i64 = 4;
    pub const INVALID_CSRF: i64 = 5;
    pub const NO_ACTIVE_SUBSCRIPTIONS: i64 = 6;
    pub const APPLE_RESPONSE: i64 = 10;
    pub const NO_SUBSCRIPTION_IN_RECEIPT: i64 = 11;
    pub const CHANGE_EMAIL_NOT_FOUND: i64 = 18;
    pub const INVALID_CONFIRM_CODE: i64 = 19;
    pub const EMAIL_ALREADY_CONFIRMED: i64 = 20;
    pub const NO_SUCH_EMAIL: i64 = 21;
    pub const NO_SUCH_SUBSCRIPTION: i64 = 26;
    pub const STORE_SUBSCRIPTION: i64 = 27;
    pub const TRIAL_ALREADY_USED: i64 = 29;
    pub const NO_DESKTOP_SUBSCRIPTION: i64 = 38;
    pub const EMAIL_TAKEN: i64 = 40;
    pub const NO_SUCH_REFERRAL: i64 = 41;
    pub const SHADOW_ALREADY_CONFIRMED: i64 = 48;
    pub const NO_IOS_SUBSCRIPTION: i64 = 52;
    pub const NO_ANDROID_SUBSCRIPTION: i64 = 53;
    pub const WRONG_DO_NOT_EMAIL_CODE: i64 = 56;
    pub const ANDROID_SIGNATURE: i64 = 63;
    pub const ANDROID_RECEIPT_FORMAT: i64 = 64;
    pub const INVALID_RESET_CODE: i64 = 77;
    pub const INTERNAL: i64 = 99;
    pub const ADD_CARD: i64 = 108;
    pub const SET_DEFAULT_CARD: i64 = 109;
    pub const CHANGE_EMAIL_UNCONFIRMED: i64 = 110;
    pub const NO_STRIPE_CUSTOMER: i64 = 111;
    pub const NOT_FOUND: i64 = 404;
}

pub const UNKNOWN_INTERNAL_ERROR: &str = "Unknown Internal Error";

/// The single error type every handler and service returns.
///
/// `status` decides how the error is negotiated; `detail` is only ever
/// logged, never sent to the client.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct AppError {
    pub status: StatusCode,
    pub code: i64,
    pub message: String,
    pub detail: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, code: i64, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl ToString) -> Self {
        self.detail = Some(detail.to_string());
        self
    }

    pub fn bad_request(code: i64, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code::UNAUTHORIZED, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::bad_request(code::VALIDATION, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code::NOT_FOUND, message)
    }

    pub fn internal(detail: impl ToString) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            code::INTERNAL,
            "Internal Server Error",
        )
        .with_detail(detail)
    }

    /// Anything outside 200..500 is hidden behind a generic message.
    pub fn is_server_error(&self) -> bool {
        !(200..500).contains(&self.status.as_u16())
    }

    /// The JSON envelope a client is allowed to see.
    pub fn public_json(&self) -> (StatusCode, serde_json::Value) {
        if self.is_server_error() {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "code": code::UNKNOWN, "message": UNKNOWN_INTERNAL_ERROR }),
            )
        } else {
            (
                self.status,
                json!({ "code": self.code, "message": self.message }),
            )
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::internal(format!("Database error: {}", e))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::internal(format!("{:#}", e))
    }
}

impl From<tower_sessions::session::Error> for AppError {
    fn from(e: tower_sessions::session::Error) -> Self {
        AppError::internal(format!("Session error: {}", e))
    }
}

impl From<askama::Error> for AppError {
    fn from(e: askama::Error) -> Self {
        AppError::internal(format!("Template error: {}", e))
    }
}

impl IntoResponse for AppError {
    /// Renders the JSON envelope and leaves the error in the response
    /// extensions so the negotiation middleware can re-render it for
    /// browsers.
    fn into_response(self) -> Response {
        let (status, body) = self.public_json();
        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_keep_their_code_and_message() {
        let error = AppError::bad_request(code::EMAIL_TAKEN, "That email is already registered.");
        let (status, body) = error.public_json();

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 40);
        assert_eq!(body["message"], "That email is already registered.");
    }

    #[test]
    fn server_errors_are_collapsed() {
        let error = AppError::internal("connection refused on 10.0.0.4:5432");
        let (status, body) = error.public_json();

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], -1);
        assert_eq!(body["message"], UNKNOWN_INTERNAL_ERROR);
    }

    #[test]
    fn success_status_errors_pass_through() {
        let error = AppError::new(StatusCode::OK, code::EMAIL_NOT_CONFIRMED, "Email Not Confirmed");
        let (status, body) = error.public_json();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 1);
    }

    #[test]
    fn into_response_keeps_error_in_extensions() {
        let response = AppError::unauthorized("Incorrect Login.").into_response();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let carried = response.extensions().get::<AppError>().unwrap();
        assert_eq!(carried.code, code::UNAUTHORIZED);
    }
}
