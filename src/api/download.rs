use axum::{
    extract::State,
    response::Redirect,
    routing::get,
    Json, Router,
};
use serde_json::json;

use crate::api::state::AppState;
use crate::error::{AppError, Result};

fn client_file(state: &AppState, name: &str) -> Result<Redirect> {
    let url = state.config.client_files.url(name).ok_or_else(|| {
        tracing::error!(file = name, "Client file location isn't configured");
        AppError::not_found("Client file not found.")
    })?;
    Ok(Redirect::to(url))
}

async fn mac_app(State(state): State<AppState>) -> Result<Redirect> {
    client_file(&state, "mac-app")
}

async fn mac_update(State(state): State<AppState>) -> Result<Redirect> {
    client_file(&state, "mac-update")
}

async fn windows_app(State(state): State<AppState>) -> Result<Redirect> {
    client_file(&state, "windows-app")
}

async fn windows_update(State(state): State<AppState>) -> Result<Redirect> {
    client_file(&state, "windows-update")
}

async fn speed_test(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "bucket": state.config.speed_test_bucket }))
}

pub fn router(state: &AppState) -> Router<AppState> {
    let guards = &state.guards;

    Router::new()
        .route("/download-mac-app", get(mac_app).layer(guards.limit(100)))
        .route("/download-mac-update", get(mac_update).layer(guards.limit(800)))
        .route("/download-windows-app", get(windows_app).layer(guards.limit(100)))
        .route(
            "/download-windows-update",
            get(windows_update).layer(guards.limit(800)),
        )
        .route("/download-speed-test", get(speed_test))
}
