// Background jobs

pub mod limiter_pruner;
pub mod receipt_refresher;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use crate::api::AppState;

/// Starts a scheduler with every background job registered.
pub async fn start(state: &AppState) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let jobs: [(&str, Job); 2] = [
        (
            receipt_refresher::SCHEDULE,
            receipt_refresher::job(state.subscriptions.clone())?,
        ),
        (limiter_pruner::SCHEDULE, limiter_pruner::job(state.guards.clone())?),
    ];
    for (schedule, job) in jobs {
        let id = scheduler.add(job).await?;
        tracing::info!(schedule, job_id = %id, "Cron job registered");
    }

    scheduler.start().await?;
    Ok(scheduler)
}
