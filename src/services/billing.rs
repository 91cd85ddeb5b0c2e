use std::sync::Arc;

use crate::error::{code, AppError, Result};
use crate::models::{Charge, Invoice, PaymentMethod, User};
use crate::repository::Store;
use crate::services::encryption::EmailVault;
use crate::services::stripe::Billing;

/// Stripe customer and card management for the account pages.
#[derive(Clone)]
pub struct BillingService {
    store: Arc<dyn Store>,
    billing: Arc<dyn Billing>,
    vault: Arc<EmailVault>,
}

impl BillingService {
    pub fn new(store: Arc<dyn Store>, billing: Arc<dyn Billing>, vault: Arc<EmailVault>) -> Self {
        Self {
            store,
            billing,
            vault,
        }
    }

    /// Returns the user with a Stripe customer attached, creating one on
    /// first use.
    pub async fn ensure_customer(&self, user: &User) -> Result<User> {
        if user.stripe_id.is_some() {
            return Ok(user.clone());
        }

        let email = user
            .email_encrypted
            .as_deref()
            .map(|sealed| self.vault.open(sealed))
            .transpose()?;
        let customer_id = self.billing.create_customer(user.id, email.as_deref()).await?;

        let mut updated = user.clone();
        updated.stripe_id = Some(customer_id);
        self.store.update_user(&updated).await?;

        tracing::info!(user_id = %user.id, "Created Stripe customer");
        Ok(updated)
    }

    pub async fn payment_methods(&self, user: &User) -> Result<Vec<PaymentMethod>> {
        match &user.stripe_id {
            Some(customer_id) => Ok(self.billing.payment_methods(customer_id).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn invoices(&self, user: &User) -> Result<Vec<Invoice>> {
        match &user.stripe_id {
            Some(customer_id) => Ok(self.billing.invoices(customer_id).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn charges(&self, user: &User) -> Result<Vec<Charge>> {
        match &user.stripe_id {
            Some(customer_id) => Ok(self.billing.charges(customer_id).await?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn add_card(&self, user: &User, token: &str) -> Result<String> {
        let user = self.ensure_customer(user).await?;
        let customer_id = customer_of(&user)?;

        self.billing
            .add_source(customer_id, token)
            .await
            .map_err(|e| AppError::bad_request(code::ADD_CARD, "Error adding card.").with_detail(e))
    }

    pub async fn set_default_card(&self, user: &User, card_id: &str) -> Result<()> {
        let customer_id = customer_of(user)?;
        self.billing
            .set_default_source(customer_id, card_id)
            .await
            .map_err(|e| {
                AppError::bad_request(code::SET_DEFAULT_CARD, "Error setting default card.").with_detail(e)
            })
    }

    pub async fn delete_card(&self, user: &User, card_id: &str) -> Result<()> {
        let customer_id = customer_of(user)?;
        Ok(self.billing.delete_source(customer_id, card_id).await?)
    }
}

fn customer_of(user: &User) -> Result<&str> {
    user.stripe_id
        .as_deref()
        .ok_or_else(|| AppError::bad_request(code::NO_STRIPE_CUSTOMER, "User has no payment account."))
}
