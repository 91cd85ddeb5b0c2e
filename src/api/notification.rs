use askama::Template;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::api::middleware::flash::Flash;
use crate::api::state::AppState;

/// Bare page that only shows flash messages.
#[derive(Template)]
#[template(path = "notification.html")]
pub struct NotificationTemplate {
    pub flash: Flash,
}

impl NotificationTemplate {
    pub fn page(status: StatusCode, flash: Flash) -> Response {
        (status, NotificationTemplate { flash }).into_response()
    }
}

async fn notification(flash: Flash) -> NotificationTemplate {
    NotificationTemplate { flash }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/notification", get(notification))
}
