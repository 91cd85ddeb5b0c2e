// API module - HTTP endpoints

pub mod account;
pub mod download;
pub mod middleware;
pub mod negotiate;
pub mod notification;
pub mod pages;
pub mod params;
pub mod reset_password;
pub mod signin;
pub mod state;
pub mod subscription;
pub mod user;

pub use state::AppState;

use axum::{
    extract::DefaultBodyLimit,
    handler::HandlerWithoutStateExt,
    http::{header, HeaderValue},
    middleware::from_fn,
    response::Response,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer, services::ServeDir, set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tower_sessions::SessionStore;

use middleware::errors::{negotiate_errors, not_found};
use middleware::flash::load_flash;
use middleware::session::session_layer;

const STATIC_DIR: &str = "public";
const HSTS: &str = "max-age=15552000; includeSubDomains";

/// The whole site: every route group, static files, and the shared layers.
pub fn app<S>(state: AppState, session_store: S) -> Router
where
    S: SessionStore + Clone,
{
    let hsts = state
        .config
        .is_production()
        .then(|| HeaderValue::from_static(HSTS));
    let static_files = ServeDir::new(STATIC_DIR)
        .call_fallback_on_method_not_allowed(true)
        .not_found_service(not_found.into_service());

    Router::new()
        .merge(account::router(&state))
        .merge(download::router(&state))
        .merge(notification::router())
        .merge(reset_password::router(&state))
        .merge(signin::router(&state))
        .merge(subscription::router(&state))
        .merge(user::router(&state))
        .merge(pages::router())
        .fallback_service(static_files)
        .layer(from_fn(negotiate_errors))
        .layer(from_fn(load_flash))
        .layer(session_layer(session_store, &state.config))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.config.body_limit()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("SAMEORIGIN"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("no-referrer"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::X_DNS_PREFETCH_CONTROL,
                    HeaderValue::from_static("off"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::STRICT_TRANSPORT_SECURITY,
                    move |_: &Response| hsts.clone(),
                )),
        )
        .with_state(state)
}
