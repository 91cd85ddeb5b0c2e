use tokio_cron_scheduler::{Job, JobSchedulerError};

use crate::api::middleware::brute_force::Guards;

/// Every ten minutes.
pub const SCHEDULE: &str = "0 */10 * * * *";

/// Drops rate-limit state for clients whose allowance has fully refilled,
/// so one-off visitors do not pile up in memory.
pub fn prune_limiters(guards: &Guards) -> usize {
    let tracked = guards.prune();
    tracing::debug!(tracked, "Pruned brute force limiters");
    tracked
}

pub fn job(guards: Guards) -> Result<Job, JobSchedulerError> {
    Job::new_async(SCHEDULE, move |_uuid, _lock| {
        let guards = guards.clone();
        Box::pin(async move {
            prune_limiters(&guards);
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn keeps_clients_still_inside_their_window() {
        let guards = Guards::new(Duration::from_secs(3600), false);
        let signin = guards.limit(5);
        signin.check("10.0.0.1").unwrap();

        assert_eq!(prune_limiters(&guards), 1);
    }
}
