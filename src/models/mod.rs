// Models module - account, billing and entitlement records

pub mod billing;
pub mod certificate;
pub mod receipt;
pub mod referral;
pub mod subscription;
pub mod user;

pub use billing::{Charge, Invoice, PaymentMethod};
pub use certificate::{Certificate, KeyBundle};
pub use receipt::Receipt;
pub use referral::{ReferredUser, Referrals};
pub use subscription::{PlanType, Platform, ReceiptType, Subscription};
pub use user::{NewUser, User};

/// ISO-8601 timestamps with millisecond precision, `2018-04-02T16:31:12.000Z`.
pub(crate) mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::Serializer;

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

    pub fn format(value: &DateTime<Utc>) -> String {
        value.format(FORMAT).to_string()
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::Serializer;

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.serialize_str(&super::format(value)),
                None => serializer.serialize_none(),
            }
        }
    }
}
