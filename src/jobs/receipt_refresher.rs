use tokio_cron_scheduler::{Job, JobSchedulerError};

use crate::services::subscriptions::{RefreshStats, SubscriptionService};

/// Top of every hour.
pub const SCHEDULE: &str = "0 0 * * * *";
const BATCH_SIZE: i64 = 500;

/// Background job that re-validates App Store and Google Play receipts
///
/// Store subscriptions renew without the apps telling us, so receipts that
/// lapsed in the last 30 days are checked again:
/// 1. Renewed receipts get their new expiration date
/// 2. Receipts the store still rejects are flagged `failed_last_check`
pub async fn refresh_receipts(subscriptions: &SubscriptionService) -> anyhow::Result<RefreshStats> {
    tracing::info!(batch_size = BATCH_SIZE, "Starting receipt refresh job");
    let stats = subscriptions.refresh_stale_receipts(BATCH_SIZE).await?;
    tracing::info!(?stats, "Receipt refresh job completed");
    Ok(stats)
}

/// Builds the cron job running [`refresh_receipts`] on [`SCHEDULE`].
pub fn job(subscriptions: SubscriptionService) -> Result<Job, JobSchedulerError> {
    Job::new_async(SCHEDULE, move |_uuid, _lock| {
        let subscriptions = subscriptions.clone();
        Box::pin(async move {
            if let Err(e) = refresh_receipts(&subscriptions).await {
                tracing::error!(error = %e, "Receipt refresh job failed");
            }
        })
    })
}
