use std::sync::Arc;

use secrecy::ExposeSecret;

use crate::api::middleware::brute_force::Guards;
use crate::config::Config;
use crate::repository::Store;
use crate::services::encryption::{EmailVault, EncryptionError};
use crate::services::mailer::Mailer;
use crate::services::receipts::ReceiptValidator;
use crate::services::stripe::Billing;
use crate::services::{AccountService, BillingService, KeyService, SubscriptionService};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub accounts: AccountService,
    pub subscriptions: SubscriptionService,
    pub billing: BillingService,
    pub keys: KeyService,
    pub guards: Guards,
}

impl AppState {
    /// Wires the services over the given store and external ports.
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn Store>,
        billing: Arc<dyn Billing>,
        receipts: Arc<dyn ReceiptValidator>,
        mailer: Arc<dyn Mailer>,
    ) -> Result<Self, EncryptionError> {
        let vault = Arc::new(EmailVault::new(config.email_secret.expose_secret())?);
        let subscriptions = SubscriptionService::new(store.clone(), billing.clone(), receipts);

        Ok(Self {
            accounts: AccountService::new(
                store.clone(),
                vault.clone(),
                mailer,
                subscriptions.clone(),
                &config.domain,
            ),
            billing: BillingService::new(store.clone(), billing, vault),
            keys: KeyService::new(
                store,
                subscriptions.clone(),
                config.key_signing_secret.expose_secret(),
            )?,
            subscriptions,
            guards: Guards::new(config.brute_force_window(), config.trust_proxy),
            config,
        })
    }
}
