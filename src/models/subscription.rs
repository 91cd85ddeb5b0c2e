use chrono::{DateTime, Months, Utc};
use serde::Serialize;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::timestamp;

#[derive(Debug, thiserror::Error)]
#[error("Unknown {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

/// Where a subscription was bought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptType {
    Ios,
    Android,
    Stripe,
}

impl ReceiptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptType::Ios => "ios",
            ReceiptType::Android => "android",
            ReceiptType::Stripe => "stripe",
        }
    }

    pub fn is_store(&self) -> bool {
        matches!(self, ReceiptType::Ios | ReceiptType::Android)
    }
}

impl FromStr for ReceiptType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(ReceiptType::Ios),
            "android" => Ok(ReceiptType::Android),
            "stripe" => Ok(ReceiptType::Stripe),
            other => Err(ParseEnumError {
                kind: "receipt type",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for ReceiptType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ReceiptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PlanType {
    #[serde(rename = "ios-monthly")]
    IosMonthly,
    #[serde(rename = "ios-annual")]
    IosAnnual,
    #[serde(rename = "android-monthly")]
    AndroidMonthly,
    #[serde(rename = "android-annual")]
    AndroidAnnual,
    #[serde(rename = "all-monthly")]
    AllMonthly,
    #[serde(rename = "all-annual")]
    AllAnnual,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::IosMonthly => "ios-monthly",
            PlanType::IosAnnual => "ios-annual",
            PlanType::AndroidMonthly => "android-monthly",
            PlanType::AndroidAnnual => "android-annual",
            PlanType::AllMonthly => "all-monthly",
            PlanType::AllAnnual => "all-annual",
        }
    }

    /// Pro plans cover every platform.
    pub fn is_pro(&self) -> bool {
        matches!(self, PlanType::AllMonthly | PlanType::AllAnnual)
    }

    pub fn is_annual(&self) -> bool {
        matches!(
            self,
            PlanType::IosAnnual | PlanType::AndroidAnnual | PlanType::AllAnnual
        )
    }

    pub fn covers(&self, platform: Platform) -> bool {
        match platform {
            Platform::Ios => {
                self.is_pro() || matches!(self, PlanType::IosMonthly | PlanType::IosAnnual)
            }
            Platform::Android => {
                self.is_pro()
                    || matches!(self, PlanType::AndroidMonthly | PlanType::AndroidAnnual)
            }
            Platform::Mac | Platform::Windows => self.is_pro(),
        }
    }

    /// Maps a store product identifier onto a plan. Product ids carry the
    /// billing period in their name (`...monthly`, `...annual`).
    pub fn from_store_product(receipt_type: ReceiptType, product_id: &str) -> Self {
        let annual = product_id.to_ascii_lowercase().contains("annual");
        match (receipt_type, annual) {
            (ReceiptType::Ios, false) => PlanType::IosMonthly,
            (ReceiptType::Ios, true) => PlanType::IosAnnual,
            (ReceiptType::Android, false) => PlanType::AndroidMonthly,
            (ReceiptType::Android, true) => PlanType::AndroidAnnual,
            (ReceiptType::Stripe, false) => PlanType::AllMonthly,
            (ReceiptType::Stripe, true) => PlanType::AllAnnual,
        }
    }

    /// Adds one billing period to `from`.
    pub fn period_end(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let months = if self.is_annual() { 12 } else { 1 };
        from.checked_add_months(Months::new(months)).unwrap_or(from)
    }
}

impl FromStr for PlanType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios-monthly" => Ok(PlanType::IosMonthly),
            "ios-annual" => Ok(PlanType::IosAnnual),
            "android-monthly" => Ok(PlanType::AndroidMonthly),
            "android-annual" => Ok(PlanType::AndroidAnnual),
            "all-monthly" => Ok(PlanType::AllMonthly),
            "all-annual" => Ok(PlanType::AllAnnual),
            other => Err(ParseEnumError {
                kind: "plan type",
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for PlanType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for PlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device platforms a key can be issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Ios,
    Android,
    Mac,
    Windows,
}

impl Platform {
    pub const NAMES: [&'static str; 4] = ["android", "ios", "mac", "windows"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Mac => "mac",
            Platform::Windows => "windows",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            "mac" => Ok(Platform::Mac),
            "windows" => Ok(Platform::Windows),
            other => Err(ParseEnumError {
                kind: "platform",
                value: other.to_string(),
            }),
        }
    }
}

/// A subscription entitlement, keyed by the receipt that backs it.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub receipt_id: String,
    #[serde(skip)]
    pub user_id: Uuid,
    #[sqlx(try_from = "String")]
    pub receipt_type: ReceiptType,
    #[sqlx(try_from = "String")]
    pub plan_type: PlanType,
    #[serde(with = "timestamp")]
    pub expiration_date: DateTime<Utc>,
    #[serde(with = "timestamp::option")]
    pub cancellation_date: Option<DateTime<Utc>>,
    pub in_trial: bool,
    pub failed_last_check: bool,
    #[serde(skip)]
    pub receipt_data: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date > now && self.cancellation_date.is_none()
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn is_pro(&self) -> bool {
        self.plan_type.is_pro()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn subscription(plan_type: PlanType, expiration_date: DateTime<Utc>) -> Subscription {
        let now = Utc::now();
        Subscription {
            receipt_id: "1000000377285392".to_string(),
            user_id: Uuid::new_v4(),
            receipt_type: ReceiptType::Ios,
            plan_type,
            expiration_date,
            cancellation_date: None,
            in_trial: false,
            failed_last_check: false,
            receipt_data: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn cancelled_or_expired_subscriptions_are_inactive() {
        let now = Utc::now();
        let mut sub = subscription(PlanType::IosMonthly, now + Duration::days(3));
        assert!(sub.is_active_at(now));

        sub.cancellation_date = Some(now);
        assert!(!sub.is_active_at(now));

        let expired = subscription(PlanType::IosMonthly, now - Duration::seconds(1));
        assert!(!expired.is_active_at(now));
    }

    #[test]
    fn platform_coverage_follows_plan() {
        assert!(PlanType::AllMonthly.covers(Platform::Mac));
        assert!(PlanType::AllAnnual.covers(Platform::Ios));
        assert!(PlanType::IosAnnual.covers(Platform::Ios));
        assert!(!PlanType::IosAnnual.covers(Platform::Android));
        assert!(!PlanType::AndroidMonthly.covers(Platform::Windows));
    }

    #[test]
    fn store_products_map_to_plans() {
        assert_eq!(
            PlanType::from_store_product(ReceiptType::Ios, "AnnualSubscription"),
            PlanType::IosAnnual
        );
        assert_eq!(
            PlanType::from_store_product(ReceiptType::Android, "monthly_sub"),
            PlanType::AndroidMonthly
        );
    }

    #[test]
    fn json_uses_camel_case_and_millisecond_timestamps() {
        let expires = Utc.with_ymd_and_hms(2018, 4, 2, 16, 31, 12).unwrap();
        let json = serde_json::to_value(subscription(PlanType::IosMonthly, expires)).unwrap();

        assert_eq!(json["receiptId"], "1000000377285392");
        assert_eq!(json["planType"], "ios-monthly");
        assert_eq!(json["receiptType"], "ios");
        assert_eq!(json["expirationDate"], "2018-04-02T16:31:12.000Z");
        assert!(json["cancellationDate"].is_null());
        assert!(json.get("userId").is_none());
    }

    #[test]
    fn annual_period_adds_a_year() {
        let start = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        assert_eq!(
            PlanType::AllAnnual.period_end(start),
            Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap()
        );
        assert_eq!(
            PlanType::AllMonthly.period_end(start),
            Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap()
        );
    }
}
