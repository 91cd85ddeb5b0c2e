use askama::Template;
use axum::{
    extract::State,
    response::Response,
    routing::{get, post},
    Router,
};

use crate::api::middleware::flash::{Flash, FlashKind, Flasher};
use crate::api::params::Params;
use crate::api::state::AppState;
use crate::error::Result;
use crate::services::accounts::RESET_CODE_LEN;

#[derive(Template)]
#[template(path = "reset-password/forgot-password.html")]
struct ForgotPasswordTemplate {
    flash: Flash,
}

#[derive(Template)]
#[template(path = "reset-password/reset-password.html")]
struct ResetPasswordTemplate {
    flash: Flash,
    code: String,
}

fn reset_code(params: &Params) -> Result<String> {
    Ok(params
        .field("code")
        .not_empty("Missing reset code.")?
        .length(RESET_CODE_LEN, "Invalid reset code.")?
        .alphanumeric("Invalid reset code.")?
        .trim()
        .string())
}

async fn forgot_password_page(flash: Flash) -> ForgotPasswordTemplate {
    ForgotPasswordTemplate { flash }
}

/// Answers the same whether or not the address has an account.
async fn forgot_password(
    State(state): State<AppState>,
    flasher: Flasher,
    params: Params,
) -> Result<Response> {
    let email = params
        .field("email")
        .exists("Missing email address.")?
        .email("Invalid email address.")?;

    state.accounts.generate_password_reset(&email).await?;
    flasher
        .redirect(
            FlashKind::Info,
            "If there is an account associated with that email, a password reset email will be sent to it.",
            "/signin",
        )
        .await
}

async fn reset_password_page(flash: Flash, params: Params) -> Result<ResetPasswordTemplate> {
    let code = reset_code(&params)?;
    Ok(ResetPasswordTemplate { flash, code })
}

async fn reset_password(
    State(state): State<AppState>,
    flasher: Flasher,
    params: Params,
) -> Result<Response> {
    let code = reset_code(&params)?;
    let new_password = params
        .field("newPassword")
        .not_empty("Missing new password.")?
        .password()?;

    state.accounts.reset_password(&code, &new_password).await?;
    flasher
        .redirect(FlashKind::Success, "New password set successfully.", "/signin")
        .await
}

pub fn router(state: &AppState) -> Router<AppState> {
    let guards = &state.guards;

    Router::new()
        .route(
            "/forgot-password",
            get(forgot_password_page).merge(post(forgot_password).layer(guards.limit(20))),
        )
        .route(
            "/reset-password",
            get(reset_password_page)
                .layer(guards.limit(20))
                .merge(post(reset_password).layer(guards.limit(20))),
        )
}
