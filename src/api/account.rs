use askama::Template;
use axum::{
    extract::State,
    http::{header, HeaderMap},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_sessions::Session;

use crate::api::middleware::auth::{require_session, require_user, CurrentUser};
use crate::api::middleware::csrf::{csrf_token, verify_csrf};
use crate::api::middleware::flash::{Flash, FlashKind, Flasher};
use crate::api::negotiate::wants_json;
use crate::api::params::Params;
use crate::api::state::AppState;
use crate::error::{AppError, Result};
use crate::models::{Charge, Invoice, PaymentMethod, Referrals, Subscription};

const NO_STORE: &str = "private, no-cache, no-store, max-age=0";

#[derive(Template)]
#[template(path = "account/account.html")]
struct AccountTemplate {
    flash: Flash,
    email: String,
    subscriptions: Vec<Subscription>,
    has_stripe_id: bool,
    code: String,
    referrals: Referrals,
    percent_off: u32,
    referred_by: bool,
}

#[derive(Template)]
#[template(path = "account/change-email.html")]
struct ChangeEmailTemplate {
    flash: Flash,
    csrf_token: String,
}

#[derive(Template)]
#[template(path = "account/change-password.html")]
struct ChangePasswordTemplate {
    flash: Flash,
    csrf_token: String,
}

#[derive(Template)]
#[template(path = "account/invoice-list.html")]
struct InvoiceListTemplate {
    flash: Flash,
    invoices: Vec<Invoice>,
    charges: Vec<Charge>,
}

#[derive(Template)]
#[template(path = "account/payment-methods.html")]
struct PaymentMethodsTemplate {
    flash: Flash,
    methods: Vec<PaymentMethod>,
}

#[derive(Template)]
#[template(path = "account/add-new-card.html")]
struct AddNewCardTemplate {
    flash: Flash,
    stripe_public_key: String,
}

async fn account(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    flash: Flash,
) -> Result<Response> {
    let subscriptions = state.subscriptions.list_active(user.id).await?;
    let referrals = state.accounts.active_referrals(&user).await?;
    let email = state.accounts.email_of(&user)?.unwrap_or_default();

    let page = AccountTemplate {
        flash,
        email,
        subscriptions,
        has_stripe_id: user.stripe_id.is_some(),
        code: user.referral_code.clone(),
        percent_off: referrals.percent_off,
        referrals,
        referred_by: user.referred_by.is_some(),
    };
    Ok(([(header::CACHE_CONTROL, NO_STORE)], page).into_response())
}

async fn change_email_page(session: Session, flash: Flash) -> Result<ChangeEmailTemplate> {
    let csrf_token = csrf_token(&session).await?;
    Ok(ChangeEmailTemplate { flash, csrf_token })
}

async fn change_email(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    flasher: Flasher,
    params: Params,
) -> Result<Response> {
    let new_email = params
        .field("newEmail")
        .exists("Missing email address.")?
        .email("Invalid email address.")?;
    let current_password = params
        .field("currentPassword")
        .not_empty("Missing password.")?
        .string();
    if !state.accounts.assert_password(&user, &current_password).await? {
        return Err(AppError::validation("Incorrect password."));
    }

    state.accounts.change_email(&user, &new_email).await?;
    flasher
        .redirect(
            FlashKind::Info,
            "A confirmation has been sent to your new email. Please click the confirmation to complete this process.",
            "/account",
        )
        .await
}

async fn confirm_change_email(
    State(state): State<AppState>,
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
        .alphanumeric("Invalid confirmation code.")?
        .string();

    state.accounts.confirm_change_email(&confirm_code, &email).await?;
    flasher
        .redirect(FlashKind::Success, "Email change confirmed.", "/account")
        .await
}

async fn change_password_page(session: Session, flash: Flash) -> Result<ChangePasswordTemplate> {
    let csrf_token = csrf_token(&session).await?;
    Ok(ChangePasswordTemplate { flash, csrf_token })
}

async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    flasher: Flasher,
    params: Params,
) -> Result<Response> {
    let current_password = params
        .field("currentPassword")
        .not_empty("Missing current password.")?
        .string();
    if !state.accounts.assert_password(&user, &current_password).await? {
        return Err(AppError::validation("Current password is incorrect."));
    }
    let new_password = params
        .field("newPassword")
        .not_empty("Missing new password.")?
        .password()?;

    state
        .accounts
        .change_password(&user, &current_password, &new_password)
        .await?;
    flasher
        .redirect(FlashKind::Success, "Password changed successfully.", "/account")
        .await
}

async fn invoices(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    flash: Flash,
    flasher: Flasher,
) -> Result<Response> {
    let listed = async {
        let invoices = state.billing.invoices(&user).await?;
        let charges = state.billing.charges(&user).await?;
        Ok::<_, AppError>((invoices, charges))
    };

    match listed.await {
        Ok((invoices, charges)) => Ok(InvoiceListTemplate {
            flash,
            invoices,
            charges,
        }
        .into_response()),
        Err(e) => {
            tracing::error!(user_id = %user.id, error = %e, detail = ?e.detail, "Error getting invoices");
            flasher
                .redirect(FlashKind::Error, "Error getting invoices.", "/account")
                .await
        }
    }
}

async fn payment_methods(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    flash: Flash,
    flasher: Flasher,
) -> Result<Response> {
    match state.billing.payment_methods(&user).await {
        Ok(methods) => Ok((
            [(header::CACHE_CONTROL, NO_STORE)],
            PaymentMethodsTemplate { flash, methods },
        )
            .into_response()),
        Err(e) => {
            tracing::error!(user_id = %user.id, error = %e, detail = ?e.detail, "Error getting payment methods");
            flasher
                .redirect(FlashKind::Error, "Error getting payment methods.", "/account")
                .await
        }
    }
}

async fn add_new_card_page(State(state): State<AppState>, flash: Flash) -> AddNewCardTemplate {
    AddNewCardTemplate {
        flash,
        stripe_public_key: state.config.stripe_public_key.clone(),
    }
}

async fn add_new_card(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    flasher: Flasher,
    params: Params,
) -> Result<Response> {
    let source = params.field("source").not_empty("Missing source.")?.string();

    state.billing.add_card(&user, &source).await?;
    if wants_json(&headers) {
        Ok(Json(json!({ "message": "Card added successfully." })).into_response())
    } else {
        flasher
            .redirect(FlashKind::Success, "Card added successfully.", "/payment-methods")
            .await
    }
}

fn card_id(params: &Params) -> Result<String> {
    Ok(params.field("cardId").not_empty("Missing card ID.")?.string())
}

async fn set_default_card(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
) -> Result<Json<serde_json::Value>> {
    let card_id = card_id(&params)?;
    state.billing.set_default_card(&user, &card_id).await?;
    Ok(Json(json!({ "message": "New default set successfully" })))
}

async fn delete_card(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
) -> Result<Json<serde_json::Value>> {
    let card_id = card_id(&params)?;
    state.billing.delete_card(&user, &card_id).await?;
    Ok(Json(json!({ "message": "Card deleted successfully" })))
}

pub fn router(state: &AppState) -> Router<AppState> {
    let guards = &state.guards;
    let user = || from_fn_with_state(state.clone(), require_user);

    Router::new()
        .route("/account", get(account).layer(guards.limit(1000)))
        .route(
            "/change-email",
            get(change_email_page)
                .layer(from_fn(verify_csrf))
                .layer(from_fn(require_session))
                .merge(
                    post(change_email)
                        .layer(from_fn(verify_csrf))
                        .layer(user())
                        .layer(guards.limit(25)),
                ),
        )
        .route(
            "/confirm-change-email",
            get(confirm_change_email).layer(guards.limit(50)),
        )
        .route(
            "/change-password",
            get(change_password_page)
                .layer(from_fn(verify_csrf))
                .layer(from_fn(require_session))
                .merge(
                    post(change_password)
                        .layer(from_fn(verify_csrf))
                        .layer(user())
                        .layer(guards.limit(20)),
                ),
        )
        .route("/invoices", get(invoices).layer(guards.limit(200)))
        .route("/payment-methods", get(payment_methods).layer(guards.limit(200)))
        .route(
            "/add-new-card",
            get(add_new_card_page)
                .layer(from_fn(require_session))
                .merge(post(add_new_card).layer(guards.limit(20))),
        )
        .route("/set-default-card", post(set_default_card).layer(guards.limit(50)))
        .route("/delete-card", post(delete_card).layer(guards.limit(20)))
}
