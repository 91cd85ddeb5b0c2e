use askama::Template;
use axum::{
    extract::State,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::api::middleware::auth::CurrentUser;
use crate::api::middleware::flash::{Flash, FlashKind, Flasher};
use crate::api::params::Params;
use crate::api::state::AppState;
use crate::error::Result;
use crate::models::Platform;
use crate::services::SignUp;

const EMAIL_CONFIRMATION_SENT: &str = "Email Confirmation Sent";

#[derive(Template)]
#[template(path = "user/signup.html")]
struct SignupTemplate {
    flash: Flash,
    refer: Option<String>,
}

#[derive(Template)]
#[template(path = "user/signup-success.html")]
struct SignupSuccessTemplate {
    flash: Flash,
}

#[derive(Template)]
#[template(path = "user/confirm-email-success.html")]
struct ConfirmEmailSuccessTemplate {
    flash: Flash,
}

#[derive(Template)]
#[template(path = "user/confirm-email-success-lockdown.html")]
struct ConfirmEmailSuccessLockdownTemplate {
    flash: Flash,
}

#[derive(Template)]
#[template(path = "user/resend-confirm-code.html")]
struct ResendConfirmCodeTemplate {
    flash: Flash,
}

#[derive(Template)]
#[template(path = "user/clients.html")]
struct ClientsTemplate {
    flash: Flash,
}

#[derive(Template)]
#[template(path = "user/do-not-email.html")]
struct DoNotEmailTemplate {
    flash: Flash,
    email: String,
    code: String,
}

/// Signup form; an unknown referral code is rejected before the form shows.
async fn signup_page(
    State(state): State<AppState>,
    flash: Flash,
    params: Params,
) -> Result<SignupTemplate> {
    let refer = params.field("refer").optional();
    if let Some(referral_code) = &refer {
        state.accounts.referrer_id(referral_code).await?;
    }
    Ok(SignupTemplate { flash, refer })
}

async fn signup(State(state): State<AppState>, params: Params) -> Result<Response> {
    let email = params
        .field("email")
        .exists("Missing email address.")?
        .email("Invalid email address.")?;
    let password = params.field("password").not_empty("Missing password.")?.password()?;
    let browser = params.field("browser").to_bool();
    let lockdown = params.field("lockdown").to_bool();
    let refer = params
        .field("refer")
        .alphanumeric_or_empty("Referral code must be alphanumeric.")?;

    let referred_by = match refer {
        Some(referral_code) => Some(state.accounts.referrer_id(referral_code).await?),
        None => None,
    };

    state
        .accounts
        .sign_up(SignUp {
            email,
            password,
            browser,
            referred_by,
            lockdown,
        })
        .await?;

    if browser {
        Ok(Redirect::to("/signup-success").into_response())
    } else {
        Ok(Json(json!({ "code": 1, "message": EMAIL_CONFIRMATION_SENT })).into_response())
    }
}

async fn signup_success(flash: Flash) -> SignupSuccessTemplate {
    SignupSuccessTemplate { flash }
}

async fn confirm_email(
    State(state): State<AppState>,
    flash: Flash,
    flasher: Flasher,
    params: Params,
) -> Result<Response> {
    let email = params
        .field("email")
        .not_empty("Missing email.")?
        .email("Invalid email address.")?;
    let confirm_code = params
        .field("code")
        .not_empty("Missing confirmation code.")?
        .trim()
        .alphanumeric("Invalid confirmation code.")?;
    let browser = params.field("browser").to_bool();
    let lockdown = params.field("lockdown").to_bool();

    state
        .accounts
        .confirm_email(confirm_code.value().unwrap_or_default(), &email)
        .await?;

    if lockdown {
        Ok(ConfirmEmailSuccessLockdownTemplate { flash }.into_response())
    } else if browser {
        flasher
            .redirect(
                FlashKind::Success,
                "Email confirmed. Please sign in.",
                "/signin?redirecturi=/new-subscription?browser=true",
            )
            .await
    } else {
        Ok(ConfirmEmailSuccessTemplate { flash }.into_response())
    }
}

async fn resend_confirm_code_page(flash: Flash) -> ResendConfirmCodeTemplate {
    ResendConfirmCodeTemplate { flash }
}

async fn resend_confirm_code(
    State(state): State<AppState>,
    flasher: Flasher,
    params: Params,
) -> Result<Response> {
    let email = params
        .field("email")
        .exists("Missing email address.")?
        .email("Invalid email address.")?;

    state.accounts.resend_confirm_code(&email).await?;
    flasher
        .redirect(
            FlashKind::Info,
            "Confirmation email re-sent. Be sure to check your spam folder, as sometimes the email can get stuck there.",
            "/signin",
        )
        .await
}

async fn convert_shadow_user(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
) -> Result<Json<serde_json::Value>> {
    let new_email = params
        .field("newemail")
        .exists("Missing email address.")?
        .email("Invalid email address.")?;
    let new_password = params
        .field("newpassword")
        .not_empty("Missing password.")?
        .password()?;

    state
        .accounts
        .convert_shadow_user(&user, &new_email, &new_password)
        .await?;
    Ok(Json(json!({ "code": 1, "message": EMAIL_CONFIRMATION_SENT })))
}

async fn clients(flash: Flash) -> ClientsTemplate {
    ClientsTemplate { flash }
}

async fn get_key(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
) -> Result<Response> {
    let platform: Platform = params
        .field("platform")
        .parse("Unrecognized platform.")?;
    let bundle = state.keys.get_key(&user, platform).await?;
    Ok(Json(bundle).into_response())
}

fn do_not_email_params(params: &Params) -> Result<(String, String)> {
    let email = params
        .field("email")
        .exists("Missing email address.")?
        .email("Invalid email address.")?;
    let do_not_email_code = params
        .field("code")
        .alphanumeric("Code must be alphanumeric")?
        .string();
    Ok((email, do_not_email_code))
}

async fn do_not_email_page(flash: Flash, params: Params) -> Result<DoNotEmailTemplate> {
    let (email, code) = do_not_email_params(&params)?;
    Ok(DoNotEmailTemplate { flash, email, code })
}

async fn do_not_email(
    State(state): State<AppState>,
    flasher: Flasher,
    params: Params,
) -> Result<Response> {
    let (email, do_not_email_code) = do_not_email_params(&params)?;
    state
        .accounts
        .set_do_not_email(&email, &do_not_email_code)
        .await?;
    flasher
        .redirect(FlashKind::Info, "You will no longer receive any emails from us.", "/signin")
        .await
}

pub fn router(state: &AppState) -> Router<AppState> {
    let guards = &state.guards;

    Router::new()
        .route(
            "/signup",
            get(signup_page).merge(post(signup).layer(guards.limit(50))),
        )
        .route("/signup-success", get(signup_success))
        .route("/confirm-email", get(confirm_email).layer(guards.limit(50)))
        .route(
            "/resend-confirm-code",
            get(resend_confirm_code_page).merge(post(resend_confirm_code).layer(guards.limit(20))),
        )
        .route(
            "/convert-shadow-user",
            post(convert_shadow_user).layer(guards.limit(30)),
        )
        .route("/clients", get(clients))
        .route("/get-key", post(get_key).layer(guards.limit(200)))
        .route(
            "/do-not-email",
            get(do_not_email_page)
                .layer(guards.limit(200))
                .merge(post(do_not_email).layer(guards.limit(20))),
        )
}
