use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// An account. Emails are never stored in the clear: `email_hash` is the
/// lookup key and `email_encrypted` is only opened for display and mail.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email_hash: Option<String>,
    pub email_encrypted: Option<Vec<u8>>,
    pub email_confirmed: bool,
    pub email_confirm_code: Option<String>,
    pub pending_email_hash: Option<String>,
    pub pending_email_encrypted: Option<Vec<u8>>,
    pub password_hash: Option<String>,
    pub password_reset_code: Option<String>,
    pub password_reset_expires_at: Option<DateTime<Utc>>,
    pub stripe_id: Option<String>,
    pub referral_code: String,
    pub referred_by: Option<Uuid>,
    pub partner_campaign: Option<String>,
    pub do_not_email: bool,
    pub do_not_email_code: String,
    pub lockdown: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Shadow users are created from an in-app purchase and have no email yet.
    pub fn is_shadow(&self) -> bool {
        self.email_hash.is_none()
    }

    pub fn has_confirmed_email(&self) -> bool {
        self.email_hash.is_some() && self.email_confirmed
    }

    pub fn reset_code_valid_at(&self, code: &str, now: DateTime<Utc>) -> bool {
        match (&self.password_reset_code, self.password_reset_expires_at) {
            (Some(stored), Some(expires_at)) => stored == code && expires_at > now,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email_hash: Option<String>,
    pub email_encrypted: Option<Vec<u8>>,
    pub email_confirm_code: Option<String>,
    pub password_hash: Option<String>,
    pub referral_code: String,
    pub referred_by: Option<Uuid>,
    pub partner_campaign: Option<String>,
    pub do_not_email_code: String,
    pub lockdown: bool,
}

impl NewUser {
    pub fn into_user(self, id: Uuid, now: DateTime<Utc>) -> User {
        User {
            id,
            email_hash: self.email_hash,
            email_encrypted: self.email_encrypted,
            email_confirmed: false,
            email_confirm_code: self.email_confirm_code,
            pending_email_hash: None,
            pending_email_encrypted: None,
            password_hash: self.password_hash,
            password_reset_code: None,
            password_reset_expires_at: None,
            stripe_id: None,
            referral_code: self.referral_code,
            referred_by: self.referred_by,
            partner_campaign: self.partner_campaign,
            do_not_email: false,
            do_not_email_code: self.do_not_email_code,
            lockdown: self.lockdown,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn reset_code_expires() {
        let now = Utc::now();
        let mut user = NewUser {
            referral_code: "abcd1234".to_string(),
            do_not_email_code: "0123456789abcdef".to_string(),
            ..NewUser::default()
        }
        .into_user(Uuid::new_v4(), now);

        assert!(!user.reset_code_valid_at("code", now));

        user.password_reset_code = Some("code".to_string());
        user.password_reset_expires_at = Some(now + Duration::hours(1));
        assert!(user.reset_code_valid_at("code", now));
        assert!(!user.reset_code_valid_at("other", now));
        assert!(!user.reset_code_valid_at("code", now + Duration::hours(2)));
    }

    #[test]
    fn shadow_users_have_no_email() {
        let user = NewUser::default().into_user(Uuid::new_v4(), Utc::now());
        assert!(user.is_shadow());
        assert!(!user.has_confirmed_email());
    }
}
