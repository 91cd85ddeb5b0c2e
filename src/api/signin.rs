use askama::Template;
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_sessions::Session;

use crate::api::middleware::flash::Flash;
use crate::api::middleware::session::{self, session_user_id};
use crate::api::negotiate::wants_json;
use crate::api::params::Params;
use crate::api::state::AppState;
use crate::error::Result;
use crate::models::ReceiptType;

/// Where a browser may be sent after signing in.
static VALID_REDIRECT_URIS: [&str; 2] = ["/new-subscription?browser=true", "/payment-methods"];
const DEFAULT_REDIRECT: &str = "/account";

#[derive(Template)]
#[template(path = "signin.html")]
struct SigninTemplate {
    flash: Flash,
    redirecturi: String,
}

fn redirect_target(requested: Option<&str>) -> &'static str {
    requested
        .map(str::trim)
        .and_then(|uri| VALID_REDIRECT_URIS.iter().find(|valid| **valid == uri))
        .copied()
        .unwrap_or(DEFAULT_REDIRECT)
}

async fn signin_page(session: Session, flash: Flash, params: Params) -> Result<Response> {
    let redirecturi = redirect_target(params.get("redirecturi"));
    if session_user_id(&session).await?.is_some() {
        return Ok(Redirect::to(redirecturi).into_response());
    }
    Ok(SigninTemplate {
        flash,
        redirecturi: redirecturi.to_string(),
    }
    .into_response())
}

enum Credentials {
    Password {
        email: String,
        password: String,
    },
    Receipt {
        receipt_type: ReceiptType,
        data: String,
        partner: Option<String>,
    },
}

impl Credentials {
    /// Email and password when they validate, else an in-app receipt. When
    /// neither validates the email error is reported.
    fn from_params(params: &Params) -> Result<Self> {
        let password_error = match Self::password(params) {
            Ok(credentials) => return Ok(credentials),
            Err(e) => e,
        };
        Self::receipt(params).map_err(|_| password_error)
    }

    fn password(params: &Params) -> Result<Self> {
        let email = params
            .field("email")
            .exists("Missing email address.")?
            .email("Invalid email address.")?;
        let password = params
            .field("password")
            .not_empty("Missing password.")?
            .string();
        Ok(Self::Password { email, password })
    }

    fn receipt(params: &Params) -> Result<Self> {
        let receipt_type = params.field("authtype").one_of(
            &[ReceiptType::Ios.as_str(), ReceiptType::Android.as_str()],
            "Invalid IAP receipt type (must be ios/android)",
        )?;
        let data = params
            .field("authreceipt")
            .not_empty("Missing receipt data.")?
            .base64("Invalid receipt data.")?;
        let partner = params.field("partner").optional().map(|partner| {
            if partner.contains('-') {
                partner
            } else {
                format!("{}-", partner)
            }
        });
        Ok(Self::Receipt {
            receipt_type,
            data,
            partner,
        })
    }
}

async fn signin(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    params: Params,
) -> Result<Response> {
    let signed_in = Json(json!({ "message": "Signed In", "code": 0 }));

    match Credentials::from_params(&params)? {
        Credentials::Password { email, password } => {
            let user = state.accounts.sign_in(&email, &password).await?;
            session::sign_in(&session, user.id).await?;
            tracing::info!(user_id = %user.id, "Signed in with password");

            if wants_json(&headers) {
                Ok(signed_in.into_response())
            } else {
                Ok(Redirect::to(redirect_target(params.get("redirecturi"))).into_response())
            }
        }
        Credentials::Receipt {
            receipt_type,
            data,
            partner,
        } => {
            let user = state
                .accounts
                .sign_in_with_receipt(receipt_type, &data, partner.as_deref())
                .await?;
            session::sign_in(&session, user.id).await?;
            tracing::info!(user_id = %user.id, receipt_type = %receipt_type, "Signed in with receipt");
            Ok(signed_in.into_response())
        }
    }
}

async fn logout(session: Session) -> Redirect {
    session::sign_out(&session).await;
    Redirect::to("/signin")
}

pub fn router(state: &AppState) -> Router<AppState> {
    let guards = &state.guards;

    Router::new()
        .route(
            "/signin",
            get(signin_page).merge(post(signin).layer(guards.limit(50))),
        )
        .route("/logout", get(logout).layer(guards.limit(20)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_known_redirects_are_followed() {
        assert_eq!(redirect_target(Some("/payment-methods")), "/payment-methods");
        assert_eq!(
            redirect_target(Some(" /new-subscription?browser=true ")),
            "/new-subscription?browser=true"
        );
        assert_eq!(redirect_target(Some("https://evil.example")), "/account");
        assert_eq!(redirect_target(None), "/account");
    }

    #[test]
    fn receipt_sign_in_tags_partner() {
        let params = Params::from([
            ("authtype", "ios"),
            ("authreceipt", "aGVsbG8="),
            ("partner", "acme"),
        ]);
        match Credentials::from_params(&params).unwrap() {
            Credentials::Receipt { partner, data, .. } => {
                assert_eq!(partner.as_deref(), Some("acme-"));
                assert_eq!(data, "aGVsbG8=");
            }
            Credentials::Password { .. } => panic!("expected receipt credentials"),
        }
    }

    #[test]
    fn email_error_wins_when_nothing_validates() {
        let params = Params::from([("email", "not-an-email"), ("authtype", "stripe")]);
        let error = Credentials::from_params(&params).err().unwrap();
        assert_eq!(error.message, "Invalid email address.");
    }
}
