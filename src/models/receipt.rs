use chrono::{DateTime, Utc};

use super::{PlanType, ReceiptType};

/// The result of validating an in-app purchase or Stripe subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub id: String,
    pub receipt_type: ReceiptType,
    pub plan_type: PlanType,
    pub expiration_date: DateTime<Utc>,
    pub cancellation_date: Option<DateTime<Utc>>,
    pub in_trial: bool,
    /// Raw receipt kept for later re-validation. Stripe receipts carry none.
    pub data: Option<String>,
}
