use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::{code, AppError, Result};
use crate::models::{PlanType, Receipt, ReceiptType, Subscription, User};
use crate::repository::Store;
use crate::services::pricing::Currency;
use crate::services::receipts::ReceiptValidator;
use crate::services::stripe::{Billing, NewStripeSubscription};

pub const TRIAL_DAYS: u32 = 7;

/// How far back the refresh job looks for lapsed store subscriptions.
pub const REFRESH_LOOKBACK_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub source: String,
    pub plan: PlanType,
    pub trial: bool,
    pub is_3ds: bool,
    pub currency: Currency,
    pub percent_off: u32,
}

#[derive(Debug, Default)]
pub struct RefreshStats {
    pub total_checked: usize,
    pub renewed: usize,
    pub lapsed: usize,
    pub failures: usize,
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn Store>,
    billing: Arc<dyn Billing>,
    receipts: Arc<dyn ReceiptValidator>,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn Store>,
        billing: Arc<dyn Billing>,
        receipts: Arc<dyn ReceiptValidator>,
    ) -> Self {
        Self {
            store,
            billing,
            receipts,
        }
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Subscription>> {
        Ok(self.store.list_subscriptions(user_id).await?)
    }

    pub async fn list_active(&self, user_id: Uuid) -> Result<Vec<Subscription>> {
        let now = Utc::now();
        Ok(self
            .list(user_id)
            .await?
            .into_iter()
            .filter(|s| s.is_active_at(now))
            .collect())
    }

    pub async fn list_active_pro(&self, user_id: Uuid) -> Result<Vec<Subscription>> {
        Ok(self
            .list_active(user_id)
            .await?
            .into_iter()
            .filter(Subscription::is_pro)
            .collect())
    }

    /// Any subscription ever held rules out another free trial.
    pub async fn has_had_subscription(&self, user_id: Uuid) -> Result<bool> {
        Ok(!self.list(user_id).await?.is_empty())
    }

    pub async fn validate_receipt(&self, receipt_type: ReceiptType, data: &str) -> Result<Receipt> {
        Ok(self.receipts.validate(receipt_type, data).await?)
    }

    pub async fn find_by_receipt(&self, receipt_id: &str) -> Result<Option<Subscription>> {
        Ok(self.store.find_subscription(receipt_id).await?)
    }

    /// Stores the state a validated receipt describes under `user_id`.
    pub async fn update_with_receipt(&self, user_id: Uuid, receipt: &Receipt) -> Result<Subscription> {
        let existing = self.store.find_subscription(&receipt.id).await?;
        if let Some(previous) = &existing {
            if previous.user_id != user_id {
                tracing::info!(
                    receipt_id = %receipt.id,
                    from_user = %previous.user_id,
                    to_user = %user_id,
                    "Moving subscription to signed-in user"
                );
            }
        }

        let now = Utc::now();
        let subscription = Subscription {
            receipt_id: receipt.id.clone(),
            user_id,
            receipt_type: receipt.receipt_type,
            plan_type: receipt.plan_type,
            expiration_date: receipt.expiration_date,
            cancellation_date: receipt.cancellation_date,
            in_trial: receipt.in_trial,
            failed_last_check: false,
            receipt_data: receipt.data.clone(),
            created_at: existing.map(|s| s.created_at).unwrap_or(now),
            updated_at: now,
        };
        self.store.upsert_subscription(&subscription).await?;

        tracing::info!(
            user_id = %user_id,
            receipt_id = %subscription.receipt_id,
            plan = %subscription.plan_type,
            "Subscription updated from receipt"
        );
        Ok(subscription)
    }

    pub async fn create_stripe_subscription(
        &self,
        user: &User,
        request: NewSubscription,
    ) -> Result<Subscription> {
        let customer_id = user.stripe_id.clone().ok_or_else(|| {
            AppError::bad_request(code::NO_STRIPE_CUSTOMER, "User has no payment account.")
        })?;

        if request.trial && self.has_had_subscription(user.id).await? {
            return Err(AppError::bad_request(
                code::TRIAL_ALREADY_USED,
                "Already had a trial, not allowing another trial.",
            ));
        }

        // 3D Secure sources are already chargeable and must not be attached as cards.
        let default_source = if request.is_3ds {
            request.source.clone()
        } else {
            self.billing.add_source(&customer_id, &request.source).await?
        };

        let created = self
            .billing
            .create_subscription(NewStripeSubscription {
                customer_id,
                price: format!("{}-{}", request.plan, request.currency.code()),
                trial_days: request.trial.then_some(TRIAL_DAYS),
                coupon: (request.percent_off > 0).then(|| format!("referral-{}", request.percent_off)),
                default_source: Some(default_source),
            })
            .await?;

        let receipt = Receipt {
            id: created.id.clone(),
            receipt_type: ReceiptType::Stripe,
            plan_type: request.plan,
            expiration_date: created.trial_end.unwrap_or(created.current_period_end),
            cancellation_date: None,
            in_trial: created.in_trial(),
            data: None,
        };
        self.update_with_receipt(user.id, &receipt).await
    }

    pub async fn cancel(&self, user: &User, receipt_id: &str) -> Result<Subscription> {
        let mut subscription = self
            .store
            .find_subscription(receipt_id)
            .await?
            .filter(|s| s.user_id == user.id)
            .ok_or_else(|| {
                AppError::bad_request(code::NO_SUCH_SUBSCRIPTION, "User has no such subscription.")
            })?;

        match subscription.receipt_type {
            ReceiptType::Ios => {
                return Err(AppError::bad_request(
                    code::STORE_SUBSCRIPTION,
                    "Subscriptions made through the iOS app must be cancelled through Apple.",
                ))
            }
            ReceiptType::Android => {
                return Err(AppError::bad_request(
                    code::STORE_SUBSCRIPTION,
                    "Subscriptions made through the Android app must be cancelled through Google Play.",
                ))
            }
            ReceiptType::Stripe => {}
        }

        self.billing.cancel_subscription(receipt_id).await?;
        subscription.cancellation_date = Some(Utc::now());
        self.store.upsert_subscription(&subscription).await?;

        tracing::info!(user_id = %user.id, receipt_id, "Subscription cancelled");
        Ok(subscription)
    }

    /// Re-validates store receipts that lapsed recently, picking up renewals
    /// the apps never reported.
    pub async fn refresh_stale_receipts(&self, batch_size: i64) -> anyhow::Result<RefreshStats> {
        let since = Utc::now() - Duration::days(REFRESH_LOOKBACK_DAYS);
        let stale = self.store.list_refreshable(since, batch_size).await?;
        let mut stats = RefreshStats {
            total_checked: stale.len(),
            ..RefreshStats::default()
        };

        for mut subscription in stale {
            let Some(data) = subscription.receipt_data.clone() else {
                continue;
            };

            match self.receipts.validate(subscription.receipt_type, &data).await {
                Ok(receipt) => {
                    subscription.failed_last_check = false;
                    if receipt.expiration_date > subscription.expiration_date {
                        stats.renewed += 1;
                    } else {
                        stats.lapsed += 1;
                    }
                    subscription.expiration_date = receipt.expiration_date;
                    subscription.cancellation_date = receipt.cancellation_date;
                    subscription.in_trial = receipt.in_trial;
                }
                Err(e) => {
                    tracing::warn!(
                        receipt_id = %subscription.receipt_id,
                        error = %e,
                        "Receipt re-validation failed"
                    );
                    subscription.failed_last_check = true;
                    stats.failures += 1;
                }
            }
            self.store.upsert_subscription(&subscription).await?;
        }

        Ok(stats)
    }
}

/// Checks the active subscriptions grant a device key on `platform`.
pub fn check_entitlement(
    active: &[Subscription],
    platform: crate::models::Platform,
    now: DateTime<Utc>,
) -> Result<()> {
    use crate::models::Platform;

    let active: Vec<&Subscription> = active.iter().filter(|s| s.is_active_at(now)).collect();
    if active.is_empty() {
        return Err(AppError::new(
            StatusCode::OK,
            code::NO_ACTIVE_SUBSCRIPTIONS,
            "No active subscriptions.",
        ));
    }
    if active.iter().any(|s| s.plan_type.covers(platform)) {
        return Ok(());
    }

    Err(match platform {
        Platform::Ios => AppError::bad_request(
            code::NO_IOS_SUBSCRIPTION,
            "User doesn't have iOS subscription or Pro subscription.",
        ),
        Platform::Android => AppError::bad_request(
            code::NO_ANDROID_SUBSCRIPTION,
            "User doesn't have Android subscription or Pro subscription.",
        ),
        Platform::Mac | Platform::Windows => AppError::bad_request(
            code::NO_DESKTOP_SUBSCRIPTION,
            "User doesn't have desktop subscription or Pro subscription.",
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;

    fn active(plan_type: PlanType) -> Subscription {
        let now = Utc::now();
        Subscription {
            receipt_id: "r".to_string(),
            user_id: Uuid::new_v4(),
            receipt_type: ReceiptType::Ios,
            plan_type,
            expiration_date: now + Duration::days(10),
            cancellation_date: None,
            in_trial: false,
            failed_last_check: false,
            receipt_data: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn no_active_subscription_reports_code_6() {
        let error = check_entitlement(&[], Platform::Ios, Utc::now()).unwrap_err();
        assert_eq!(error.status, StatusCode::OK);
        assert_eq!(error.code, 6);
    }

    #[test]
    fn ios_plan_does_not_unlock_desktop() {
        let subs = [active(PlanType::IosMonthly)];
        assert!(check_entitlement(&subs, Platform::Ios, Utc::now()).is_ok());

        let error = check_entitlement(&subs, Platform::Mac, Utc::now()).unwrap_err();
        assert_eq!(error.code, code::NO_DESKTOP_SUBSCRIPTION);
        assert!(error.message.contains("doesn't have desktop subscription"));

        let error = check_entitlement(&subs, Platform::Android, Utc::now()).unwrap_err();
        assert_eq!(error.code, code::NO_ANDROID_SUBSCRIPTION);
    }

    #[test]
    fn pro_plan_unlocks_everything() {
        let subs = [active(PlanType::AllAnnual)];
        for platform in [Platform::Ios, Platform::Android, Platform::Mac, Platform::Windows] {
            assert!(check_entitlement(&subs, platform, Utc::now()).is_ok());
        }
    }
}
