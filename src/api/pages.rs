use std::net::SocketAddr;

use askama::Template;
use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::api::middleware::brute_force::client_ip;
use crate::api::middleware::flash::Flash;
use crate::api::negotiate::browser_locale;
use crate::api::state::AppState;
use crate::error::{AppError, Result};
use crate::services::pricing::PlanPrices;

#[derive(Template)]
#[template(path = "pages/index.html")]
struct IndexTemplate {
    flash: Flash,
    half: String,
    month: String,
    annual_month: String,
}

#[derive(Template)]
#[template(path = "pages/why-vpn.html")]
struct WhyVpnTemplate {
    flash: Flash,
    ip: String,
}

/// Pages with nothing but the layout and flash messages.
macro_rules! static_page {
    ($name:ident, $handler:ident, $path:literal) => {
        #[derive(Template)]
        #[template(path = $path)]
        struct $name {
            flash: Flash,
        }

        async fn $handler(flash: Flash) -> $name {
            $name { flash }
        }
    };
}

static_page!(AboutUsTemplate, about_us, "pages/about-us.html");
static_page!(OpenlyOperatedTemplate, openly_operated, "pages/openly-operated.html");
static_page!(PrivacyTemplate, privacy, "pages/privacy.html");
static_page!(TermsTemplate, terms, "pages/terms.html");
static_page!(SupportTemplate, support, "pages/support.html");
static_page!(ContactTemplate, contact, "pages/contact.html");

/// Landing page, priced in the browser's currency.
async fn index(headers: HeaderMap, flash: Flash) -> IndexTemplate {
    let locale = browser_locale(&headers).unwrap_or_default();
    let prices = PlanPrices::for_locale(&locale, 0);
    IndexTemplate {
        flash,
        half: prices.half,
        month: prices.month,
        annual_month: prices.annual_month,
    }
}

async fn why_vpn(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    flash: Flash,
) -> WhyVpnTemplate {
    WhyVpnTemplate {
        flash,
        ip: client_ip(&headers, peer.map(|ConnectInfo(addr)| addr), state.config.trust_proxy),
    }
}

async fn ip(
    State(state): State<AppState>,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Json<serde_json::Value> {
    let peer = peer.map(|ConnectInfo(addr)| addr);
    Json(json!({ "ip": client_ip(&headers, peer, state.config.trust_proxy) }))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "message": format!("OK from {}", state.config.domain) }))
}

/// Fires a server error so alerting can be checked end to end.
async fn error_test() -> Result<()> {
    Err(AppError::new(StatusCode::INTERNAL_SERVER_ERROR, 999, "Test alerts").with_detail("Details here"))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/about-us", get(about_us))
        .route("/why-vpn", get(why_vpn))
        .route("/openly-operated", get(openly_operated))
        .route("/privacy", get(privacy))
        .route("/privacy.html", get(privacy))
        .route("/terms", get(terms))
        .route("/terms.html", get(terms))
        .route("/support", get(support))
        .route("/contact", get(contact))
        .route("/error-test", get(error_test))
        .route("/ip", get(ip))
        .route("/health", get(health))
}
