use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::{code, AppError, Result};
use crate::models::{NewUser, ReceiptType, ReferredUser, Referrals, User};
use crate::repository::Store;
use crate::services::encryption::{self, EmailVault, LOWER_ALPHANUMERIC};
use crate::services::mailer::{Mailer, Templates};
use crate::services::passwords::{hash_password, verify_password};
use crate::services::subscriptions::SubscriptionService;

const CONFIRM_CODE_LEN: usize = 20;
pub const RESET_CODE_LEN: usize = 32;
const REFERRAL_CODE_LEN: usize = 8;
const DO_NOT_EMAIL_CODE_LEN: usize = 16;
const RESET_CODE_TTL_HOURS: i64 = 1;
const REFERRAL_CODE_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct SignUp {
    pub email: String,
    pub password: String,
    pub browser: bool,
    pub referred_by: Option<Uuid>,
    pub lockdown: bool,
}

/// Users, credentials and email ownership.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn Store>,
    vault: Arc<EmailVault>,
    mailer: Arc<dyn Mailer>,
    subscriptions: SubscriptionService,
    domain: Arc<str>,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn Store>,
        vault: Arc<EmailVault>,
        mailer: Arc<dyn Mailer>,
        subscriptions: SubscriptionService,
        domain: &str,
    ) -> Self {
        Self {
            store,
            vault,
            mailer,
            subscriptions,
            domain: Arc::from(domain),
        }
    }

    fn templates(&self) -> Templates<'_> {
        Templates {
            domain: &self.domain,
        }
    }

    pub async fn find(&self, user_id: Uuid) -> Result<Option<User>> {
        Ok(self.store.find_by_id(user_id).await?)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.store.find_by_email_hash(&self.vault.hash(email)).await?)
    }

    /// Opens the stored email for display and mail.
    pub fn email_of(&self, user: &User) -> Result<Option<String>> {
        user.email_encrypted
            .as_deref()
            .map(|sealed| self.vault.open(sealed))
            .transpose()
            .map_err(AppError::from)
    }

    pub async fn referrer_id(&self, referral_code: &str) -> Result<Uuid> {
        self.store
            .find_by_referral_code(&referral_code.to_ascii_lowercase())
            .await?
            .map(|u| u.id)
            .ok_or_else(|| AppError::bad_request(code::NO_SUCH_REFERRAL, "Referral code doesn't exist."))
    }

    async fn ensure_email_available(&self, email_hash: &str, user_id: Option<Uuid>) -> Result<()> {
        match self.store.find_by_email_hash(email_hash).await? {
            Some(existing) if Some(existing.id) != user_id => Err(AppError::bad_request(
                code::EMAIL_TAKEN,
                "That email is already registered.",
            )),
            _ => Ok(()),
        }
    }

    async fn insert_user(&self, mut new_user: NewUser) -> Result<User> {
        let mut last_error = None;
        for _ in 0..REFERRAL_CODE_ATTEMPTS {
            new_user.referral_code = encryption::random_string(REFERRAL_CODE_LEN, LOWER_ALPHANUMERIC)?;
            if self
                .store
                .find_by_referral_code(&new_user.referral_code)
                .await?
                .is_some()
            {
                continue;
            }
            match self.store.create_user(new_user.clone()).await {
                Ok(user) => return Ok(user),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error
            .map(AppError::from)
            .unwrap_or_else(|| AppError::internal("Could not allocate a referral code")))
    }

    pub async fn sign_up(&self, request: SignUp) -> Result<User> {
        let email_hash = self.vault.hash(&request.email);
        self.ensure_email_available(&email_hash, None).await?;

        let confirm_code = encryption::random_alphanumeric(CONFIRM_CODE_LEN)?;
        let do_not_email_code = encryption::random_alphanumeric(DO_NOT_EMAIL_CODE_LEN)?;
        let user = self
            .insert_user(NewUser {
                email_hash: Some(email_hash),
                email_encrypted: Some(self.vault.seal(&request.email)?),
                email_confirm_code: Some(confirm_code.clone()),
                password_hash: Some(hash_password(&request.password).await?),
                referred_by: request.referred_by,
                do_not_email_code: do_not_email_code.clone(),
                lockdown: request.lockdown,
                ..NewUser::default()
            })
            .await?;

        self.mailer
            .send(self.templates().confirm_email(
                &request.email,
                &confirm_code,
                request.browser,
                request.lockdown,
                &do_not_email_code,
            ))
            .await?;

        tracing::info!(user_id = %user.id, referred = user.referred_by.is_some(), "User signed up");
        Ok(user)
    }

    pub async fn confirm_email(&self, confirm_code: &str, email: &str) -> Result<User> {
        let invalid = || AppError::bad_request(code::INVALID_CONFIRM_CODE, "Invalid confirmation code.");

        let mut user = self.find_by_email(email).await?.ok_or_else(invalid)?;
        if user.email_confirmed {
            return Err(AppError::bad_request(
                code::EMAIL_ALREADY_CONFIRMED,
                "Email already confirmed.",
            ));
        }
        if user.email_confirm_code.as_deref() != Some(confirm_code) {
            return Err(invalid());
        }

        user.email_confirmed = true;
        user.email_confirm_code = None;
        self.store.update_user(&user).await?;

        tracing::info!(user_id = %user.id, "Email confirmed");
        Ok(user)
    }

    pub async fn resend_confirm_code(&self, email: &str) -> Result<()> {
        let mut user = self
            .find_by_email(email)
            .await?
            .ok_or_else(|| AppError::bad_request(code::NO_SUCH_EMAIL, "No such email."))?;
        if user.email_confirmed {
            return Err(AppError::bad_request(
                code::EMAIL_ALREADY_CONFIRMED,
                "Email already confirmed.",
            ));
        }

        let confirm_code = match &user.email_confirm_code {
            Some(existing) => existing.clone(),
            None => {
                let fresh = encryption::random_alphanumeric(CONFIRM_CODE_LEN)?;
                user.email_confirm_code = Some(fresh.clone());
                self.store.update_user(&user).await?;
                fresh
            }
        };

        self.mailer
            .send(self.templates().confirm_email(
                email,
                &confirm_code,
                true,
                user.lockdown,
                &user.do_not_email_code,
            ))
            .await?;
        Ok(())
    }

    /// Email sign-in. Unconfirmed accounts are refused with code 1 so
    /// browsers can be sent to the resend page.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        let incorrect = || AppError::unauthorized("Incorrect Login.");

        let user = self.find_by_email(email).await?.ok_or_else(incorrect)?;
        let hash = user.password_hash.as_deref().ok_or_else(incorrect)?;
        if !verify_password(password, hash).await? {
            return Err(incorrect());
        }
        if !user.email_confirmed {
            return Err(AppError::new(
                StatusCode::OK,
                code::EMAIL_NOT_CONFIRMED,
                "Email Not Confirmed",
            ));
        }
        Ok(user)
    }

    /// Signs in the owner of an in-app purchase, creating a shadow user the
    /// first time a receipt is seen.
    pub async fn sign_in_with_receipt(
        &self,
        receipt_type: ReceiptType,
        data: &str,
        partner: Option<&str>,
    ) -> Result<User> {
        let receipt = self.subscriptions.validate_receipt(receipt_type, data).await?;

        let owner = match self.subscriptions.find_by_receipt(&receipt.id).await? {
            Some(existing) => self.store.find_by_id(existing.user_id).await?,
            None => None,
        };
        let user = match owner {
            Some(user) => user,
            None => {
                let user = self
                    .insert_user(NewUser {
                        partner_campaign: partner.map(str::to_string),
                        do_not_email_code: encryption::random_alphanumeric(DO_NOT_EMAIL_CODE_LEN)?,
                        ..NewUser::default()
                    })
                    .await?;
                tracing::info!(user_id = %user.id, receipt_type = %receipt_type, "Created shadow user");
                user
            }
        };

        self.subscriptions.update_with_receipt(user.id, &receipt).await?;
        Ok(user)
    }

    pub async fn convert_shadow_user(&self, user: &User, new_email: &str, new_password: &str) -> Result<()> {
        if user.has_confirmed_email() {
            return Err(AppError::bad_request(
                code::SHADOW_ALREADY_CONFIRMED,
                "Can't convert shadow user that already has a confirmed email.",
            ));
        }

        let email_hash = self.vault.hash(new_email);
        self.ensure_email_available(&email_hash, Some(user.id)).await?;

        let confirm_code = encryption::random_alphanumeric(CONFIRM_CODE_LEN)?;
        let mut updated = user.clone();
        updated.email_hash = Some(email_hash);
        updated.email_encrypted = Some(self.vault.seal(new_email)?);
        updated.email_confirmed = false;
        updated.email_confirm_code = Some(confirm_code.clone());
        updated.password_hash = Some(hash_password(new_password).await?);
        self.store.update_user(&updated).await?;

        self.mailer
            .send(self.templates().confirm_email(
                new_email,
                &confirm_code,
                false,
                updated.lockdown,
                &updated.do_not_email_code,
            ))
            .await?;

        tracing::info!(user_id = %user.id, "Shadow user converted");
        Ok(())
    }

    pub async fn assert_password(&self, user: &User, password: &str) -> Result<bool> {
        match user.password_hash.as_deref() {
            Some(hash) => verify_password(password, hash).await,
            None => Ok(false),
        }
    }

    pub async fn change_email(&self, user: &User, new_email: &str) -> Result<()> {
        if !user.has_confirmed_email() {
            return Err(AppError::bad_request(
                code::CHANGE_EMAIL_UNCONFIRMED,
                "Can't change email on user without confirmed email.",
            ));
        }

        let email_hash = self.vault.hash(new_email);
        self.ensure_email_available(&email_hash, None).await?;

        let confirm_code = encryption::random_alphanumeric(CONFIRM_CODE_LEN)?;
        let mut updated = user.clone();
        updated.pending_email_hash = Some(email_hash);
        updated.pending_email_encrypted = Some(self.vault.seal(new_email)?);
        updated.email_confirm_code = Some(confirm_code.clone());
        self.store.update_user(&updated).await?;

        self.mailer
            .send(self.templates().confirm_change_email(
                new_email,
                &confirm_code,
                &updated.do_not_email_code,
            ))
            .await?;
        Ok(())
    }

    pub async fn confirm_change_email(&self, confirm_code: &str, email: &str) -> Result<User> {
        let not_found =
            || AppError::bad_request(code::CHANGE_EMAIL_NOT_FOUND, "Email change request not found.");

        let email_hash = self.vault.hash(email);
        let mut user = self
            .store
            .find_by_pending_email_hash(&email_hash)
            .await?
            .filter(|u| u.email_confirm_code.as_deref() == Some(confirm_code))
            .ok_or_else(not_found)?;

        // Someone else may have claimed the address since the request.
        self.ensure_email_available(&email_hash, Some(user.id)).await?;

        user.email_hash = user.pending_email_hash.take();
        user.email_encrypted = user.pending_email_encrypted.take();
        user.email_confirm_code = None;
        user.email_confirmed = true;
        self.store.update_user(&user).await?;

        tracing::info!(user_id = %user.id, "Email change confirmed");
        Ok(user)
    }

    pub async fn change_password(&self, user: &User, current: &str, new_password: &str) -> Result<()> {
        if !self.assert_password(user, current).await? {
            return Err(AppError::validation("Current password is incorrect."));
        }

        let mut updated = user.clone();
        updated.password_hash = Some(hash_password(new_password).await?);
        updated.password_reset_code = None;
        updated.password_reset_expires_at = None;
        self.store.update_user(&updated).await?;

        if let Some(email) = self.email_of(&updated)? {
            if !updated.do_not_email {
                self.mailer
                    .send(self.templates().password_changed(&email, &updated.do_not_email_code))
                    .await?;
            }
        }
        Ok(())
    }

    /// Always succeeds so the response does not reveal which emails exist.
    pub async fn generate_password_reset(&self, email: &str) -> Result<()> {
        let Some(mut user) = self.find_by_email(email).await? else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let reset_code = encryption::random_alphanumeric(RESET_CODE_LEN)?;
        user.password_reset_code = Some(reset_code.clone());
        user.password_reset_expires_at = Some(Utc::now() + Duration::hours(RESET_CODE_TTL_HOURS));
        self.store.update_user(&user).await?;

        self.mailer
            .send(
                self.templates()
                    .password_reset(email, &reset_code, &user.do_not_email_code),
            )
            .await?;
        Ok(())
    }

    pub async fn reset_password(&self, reset_code: &str, new_password: &str) -> Result<()> {
        let mut user = self
            .store
            .find_by_reset_code(reset_code)
            .await?
            .filter(|u| u.reset_code_valid_at(reset_code, Utc::now()))
            .ok_or_else(|| AppError::bad_request(code::INVALID_RESET_CODE, "Invalid reset code."))?;

        user.password_hash = Some(hash_password(new_password).await?);
        user.password_reset_code = None;
        user.password_reset_expires_at = None;
        self.store.update_user(&user).await?;

        tracing::info!(user_id = %user.id, "Password reset");
        Ok(())
    }

    pub async fn set_do_not_email(&self, email: &str, do_not_email_code: &str) -> Result<()> {
        let mut user = self
            .find_by_email(email)
            .await?
            .filter(|u| u.do_not_email_code == do_not_email_code)
            .ok_or_else(|| {
                AppError::bad_request(code::WRONG_DO_NOT_EMAIL_CODE, "Wrong code and/or email.")
            })?;

        user.do_not_email = true;
        self.store.update_user(&user).await?;
        Ok(())
    }

    /// Referred users currently paying for a subscription.
    pub async fn active_referrals(&self, user: &User) -> Result<Referrals> {
        let mut paying = Vec::new();
        for referred in self.store.list_referred(user.id).await? {
            let active = self.subscriptions.list_active(referred.id).await?;
            if active.iter().any(|s| !s.in_trial) {
                paying.push(ReferredUser {
                    user_id: referred.id,
                    joined_at: referred.created_at,
                });
            }
        }
        Ok(Referrals::new(paying))
    }
}
