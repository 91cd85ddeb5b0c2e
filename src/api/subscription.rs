use askama::Template;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::api::middleware::auth::{CurrentUser, SessionUser};
use crate::api::middleware::flash::{Flash, FlashKind, Flasher};
use crate::api::negotiate::browser_locale;
use crate::api::params::Params;
use crate::api::state::AppState;
use crate::error::{code, AppError, Result};
use crate::models::{PaymentMethod, PlanType, ReceiptType, Subscription, User};
use crate::services::pricing::{Locale, PlanPrices};
use crate::services::subscriptions::NewSubscription;

const DEFAULT_PLAN: &str = "all-monthly";
const NO_LOCALE: &str = "none";

#[derive(Template)]
#[template(path = "subscription/new-subscription.html")]
struct NewSubscriptionTemplate {
    flash: Flash,
    source: String,
    client_secret: String,
    methods: Vec<PaymentMethod>,
    currency: String,
    plan: String,
    trial: bool,
    upgrade: String,
    browser: bool,
    browser_locale: String,
    param_locale: String,
    month: String,
    year: String,
    month_discounted: i64,
    annual_discounted: i64,
    referred_by: bool,
    stripe_public_key: String,
}

#[derive(Template)]
#[template(path = "subscription/cancel-subscription.html")]
struct CancelSubscriptionTemplate {
    flash: Flash,
    receipt_id: String,
}

/// Param locale first, then the browser's; the first parseable one wins.
fn pricing_locale(param_locale: Option<&str>, browser_locale: Option<&str>) -> Option<Locale> {
    param_locale
        .and_then(Locale::parse)
        .or_else(|| browser_locale.and_then(Locale::parse))
}

async fn subscriptions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Subscription>>> {
    Ok(Json(state.subscriptions.list(user.id).await?))
}

async fn active_subscriptions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Subscription>>> {
    Ok(Json(state.subscriptions.list_active(user.id).await?))
}

async fn new_subscription_page(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    headers: HeaderMap,
    flash: Flash,
    flasher: Flasher,
    params: Params,
) -> Result<Response> {
    let browser = params.field("browser").to_bool();
    let plan = params.field("plan").optional().unwrap_or_else(|| DEFAULT_PLAN.to_string());
    let param_locale = params.field("locale").optional();
    let browser_locale = browser_locale(&headers);

    let user = state.billing.ensure_customer(&user).await?;
    let referrals = state.accounts.active_referrals(&user).await?;
    let trial = !state.subscriptions.has_had_subscription(user.id).await?;

    if !state.subscriptions.list_active_pro(user.id).await?.is_empty() {
        return flasher
            .redirect(FlashKind::Info, "You already have an active Pro subscription.", "/account")
            .await;
    }

    let locale = param_locale
        .as_deref()
        .and_then(Locale::parse)
        .or_else(|| browser_locale.clone())
        .unwrap_or_default();
    let prices = PlanPrices::for_locale(&locale, referrals.percent_off);

    let methods = state.billing.payment_methods(&user).await.map_err(|e| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            code::INTERNAL,
            "Error getting payment methods for user.",
        )
        .with_detail(e)
    })?;

    Ok(NewSubscriptionTemplate {
        flash,
        source: params.field("source").string(),
        client_secret: params.field("client_secret").string(),
        methods,
        currency: prices.currency.code().to_string(),
        plan,
        trial,
        upgrade: params.field("upgrade").string(),
        browser,
        browser_locale: browser_locale
            .map(|l| l.tag().to_ascii_lowercase())
            .unwrap_or_else(|| NO_LOCALE.to_string()),
        param_locale: param_locale.unwrap_or_else(|| NO_LOCALE.to_string()),
        month: prices.month,
        year: prices.year,
        month_discounted: prices.month_discounted_minor,
        annual_discounted: prices.year_discounted_minor,
        referred_by: user.referred_by.is_some(),
        stripe_public_key: state.config.stripe_public_key.clone(),
    }
    .into_response())
}

struct SubscriptionForm {
    source: String,
    is_3ds: bool,
    trial: bool,
    plan: PlanType,
    upgrade: Option<String>,
    browser: bool,
    browser_locale: Option<String>,
    param_locale: Option<String>,
}

impl SubscriptionForm {
    fn from_params(params: &Params) -> Result<Self> {
        let source = params
            .field("source")
            .not_empty("Missing source.")?
            .trim()
            .string();
        let trial = params.field("trial").not_empty("Missing trial.")?.to_bool_strict();
        let plan = params.field("plan").not_empty("Missing plan.")?.one_of(
            &[PlanType::AllMonthly.as_str(), PlanType::AllAnnual.as_str()],
            "Invalid plan type.",
        )?;

        Ok(Self {
            source,
            is_3ds: params.field("is3ds").to_bool(),
            trial,
            plan,
            upgrade: params.field("upgrade").optional(),
            browser: params.field("browser").to_bool(),
            browser_locale: params.field("browserLocale").optional(),
            param_locale: params.field("paramLocale").optional(),
        })
    }

    /// Reminder to cancel the store subscription being replaced.
    fn upgrade_notice(&self) -> Option<&'static str> {
        match self.upgrade.as_deref()? {
            "ios-monthly" | "ios-annual" => Some(
                "You've successfully upgraded from the iOS-only plan to the Pro Plan for all devices. Be sure to cancel your iOS-only subscription with Apple iTunes.",
            ),
            "android-monthly" | "android-annual" => Some(
                "You've successfully upgraded from the Android-only plan to the Pro Plan for all devices. Be sure to cancel your Android subscription with Google Play.",
            ),
            _ => None,
        }
    }
}

async fn subscribe(state: &AppState, user: &User, form: &SubscriptionForm) -> Result<Subscription> {
    let user = state.billing.ensure_customer(user).await?;
    let referrals = state.accounts.active_referrals(&user).await?;
    let locale = pricing_locale(form.param_locale.as_deref(), form.browser_locale.as_deref())
        .unwrap_or_default();
    let currency = PlanPrices::for_locale(&locale, referrals.percent_off).currency;

    state
        .subscriptions
        .create_stripe_subscription(
            &user,
            NewSubscription {
                source: form.source.clone(),
                plan: form.plan,
                trial: form.trial,
                is_3ds: form.is_3ds,
                currency,
                percent_off: referrals.percent_off,
            },
        )
        .await
}

async fn new_subscription(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    flasher: Flasher,
    params: Params,
) -> Result<Response> {
    let form = SubscriptionForm::from_params(&params)?;

    match subscribe(&state, &user, &form).await {
        Ok(subscription) => {
            tracing::info!(user_id = %user.id, receipt_id = %subscription.receipt_id, plan = %form.plan, "Stripe subscription created");
            if let Some(notice) = form.upgrade_notice() {
                flasher.redirect(FlashKind::Info, notice, "/account").await
            } else if form.browser {
                Ok(Redirect::to("/clients").into_response())
            } else {
                Ok(Redirect::to("tunnels://stripesuccess").into_response())
            }
        }
        Err(e) if form.browser => {
            tracing::info!(user_id = %user.id, error = %e, detail = ?e.detail, "Error processing card");
            flasher
                .redirect(
                    FlashKind::Error,
                    "Error processing card. Please double check card information.",
                    "/new-subscription?browser=true",
                )
                .await
        }
        Err(e) => Err(e),
    }
}

async fn subscription_event(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    params: Params,
) -> Result<Json<serde_json::Value>> {
    let receipt_type: ReceiptType = params.field("authtype").one_of(
        &[ReceiptType::Ios.as_str(), ReceiptType::Android.as_str()],
        "Invalid IAP receipt type (must be ios/android)",
    )?;
    let data = params
        .field("authreceipt")
        .not_empty("Missing receipt data.")?
        .base64("Invalid receipt data.")?;

    let receipt = state.subscriptions.validate_receipt(receipt_type, &data).await?;
    state.subscriptions.update_with_receipt(user.id, &receipt).await?;
    Ok(Json(json!({ "message": "Subscription Updated" })))
}

fn receipt_id(params: &Params) -> Result<String> {
    Ok(params
        .field("receiptId")
        .not_empty("Missing receipt ID.")?
        .trim()
        .string())
}

async fn cancel_subscription_page(
    _session_user: SessionUser,
    flash: Flash,
    flasher: Flasher,
    params: Params,
) -> Result<Response> {
    let receipt_id = receipt_id(&params)?;
    let receipt_type: ReceiptType = params.field("receiptType").one_of(
        &[
            ReceiptType::Ios.as_str(),
            ReceiptType::Android.as_str(),
            ReceiptType::Stripe.as_str(),
        ],
        "Invalid receipt type.",
    )?;

    match receipt_type {
        ReceiptType::Ios => {
            flasher
                .redirect(
                    FlashKind::Info,
                    "Subscriptions made through the iOS app must be cancelled through Apple.",
                    "/account",
                )
                .await
        }
        ReceiptType::Android => {
            flasher
                .redirect(
                    FlashKind::Info,
                    "Subscriptions made through the Android app must be cancelled through Google Play.",
                    "/account",
                )
                .await
        }
        ReceiptType::Stripe => Ok(CancelSubscriptionTemplate { flash, receipt_id }.into_response()),
    }
}

async fn cancel_subscription(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    flasher: Flasher,
    params: Params,
) -> Result<Response> {
    let receipt_id = receipt_id(&params)?;
    let reason = params.field("reason").optional().unwrap_or_else(|| "none".to_string());
    tracing::warn!(user_id = %user.id, receipt_id = %receipt_id, reason = %reason, "Subscription cancellation reason");

    state.subscriptions.cancel(&user, &receipt_id).await?;
    flasher
        .redirect(FlashKind::Success, "Subscription cancelled successfully.", "/account")
        .await
}

pub fn router(state: &AppState) -> Router<AppState> {
    let guards = &state.guards;

    Router::new()
        .route("/subscriptions", post(subscriptions).layer(guards.limit(300)))
        .route(
            "/active-subscriptions",
            post(active_subscriptions).layer(guards.limit(300)),
        )
        .route(
            "/new-subscription",
            get(new_subscription_page)
                .layer(guards.limit(100))
                .merge(post(new_subscription).layer(guards.limit(50))),
        )
        .route(
            "/subscription-event",
            post(subscription_event).layer(guards.limit(100)),
        )
        .route(
            "/cancel-subscription",
            get(cancel_subscription_page)
                .layer(guards.limit(50))
                .merge(post(cancel_subscription)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_locale_beats_browser_locale() {
        let locale = pricing_locale(Some("en-GB"), Some("de-DE")).unwrap();
        assert_eq!(locale.country.as_deref(), Some("gb"));

        let locale = pricing_locale(Some("none"), Some("de-DE")).unwrap();
        assert_eq!(locale.country.as_deref(), Some("de"));

        assert!(pricing_locale(None, None).is_none());
    }

    #[test]
    fn only_pro_plans_can_be_bought_on_the_web() {
        let params = Params::from([("source", " src_123 "), ("trial", "true"), ("plan", "ios-monthly")]);
        let error = SubscriptionForm::from_params(&params).err().unwrap();
        assert_eq!(error.message, "Invalid plan type.");

        let params = Params::from([("source", " src_123 "), ("trial", "true"), ("plan", "all-annual")]);
        let form = SubscriptionForm::from_params(&params).unwrap();
        assert_eq!(form.source, "src_123");
        assert!(form.trial);
        assert_eq!(form.plan, PlanType::AllAnnual);
    }

    #[test]
    fn store_upgrades_get_a_notice() {
        let params = Params::from([
            ("source", "src_123"),
            ("trial", "false"),
            ("plan", "all-monthly"),
            ("upgrade", "android-annual"),
        ]);
        let form = SubscriptionForm::from_params(&params).unwrap();
        assert!(!form.trial);
        assert!(form.upgrade_notice().unwrap().contains("Google Play"));
    }
}
