use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const PERCENT_OFF_PER_REFERRAL: u32 = 10;

#[derive(Debug, Clone)]
pub struct ReferredUser {
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

/// Referred users that hold a paid (non-trial) active subscription.
#[derive(Debug, Clone, Default)]
pub struct Referrals {
    pub users: Vec<ReferredUser>,
    pub percent_off: u32,
}

impl Referrals {
    pub fn new(users: Vec<ReferredUser>) -> Self {
        let count = u32::try_from(users.len()).unwrap_or(u32::MAX);
        let percent_off = count.saturating_mul(PERCENT_OFF_PER_REFERRAL).min(100);
        Self { users, percent_off }
    }

    pub fn count(&self) -> usize {
        self.users.len()
    }
}
