// Services module - account, billing and entitlement logic behind the routes

pub mod accounts;
pub mod billing;
pub mod encryption;
pub mod keys;
pub mod mailer;
pub mod passwords;
pub mod pricing;
pub mod receipts;
pub mod stripe;
pub mod subscriptions;

pub use accounts::{AccountService, SignUp};
pub use billing::BillingService;
pub use keys::KeyService;
pub use subscriptions::SubscriptionService;

use crate::error::AppError;

impl From<encryption::EncryptionError> for AppError {
    fn from(e: encryption::EncryptionError) -> Self {
        AppError::internal(format!("Encryption error: {}", e))
    }
}

impl From<stripe::StripeError> for AppError {
    fn from(e: stripe::StripeError) -> Self {
        AppError::internal(format!("Stripe error: {}", e))
    }
}
