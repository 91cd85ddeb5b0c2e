use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A saved card on a Stripe customer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentMethod {
    pub id: String,
    pub brand: String,
    pub last4: String,
    pub exp_month: u32,
    pub exp_year: u32,
    pub is_default: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    pub number: Option<String>,
    pub amount_due: i64,
    pub currency: String,
    pub status: Option<String>,
    pub created: DateTime<Utc>,
    pub hosted_invoice_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Charge {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub description: Option<String>,
    pub created: DateTime<Utc>,
    pub receipt_url: Option<String>,
}

/// Amounts come back from Stripe in the currency's minor unit.
pub fn format_amount(amount: i64, currency: &str) -> String {
    let upper = currency.to_ascii_uppercase();
    if upper == "JPY" {
        format!("{} {}", amount, upper)
    } else {
        format!("{}.{:02} {}", amount / 100, (amount % 100).abs(), upper)
    }
}

impl Invoice {
    pub fn display_amount(&self) -> String {
        format_amount(self.amount_due, &self.currency)
    }

    pub fn display_date(&self) -> String {
        self.created.format("%Y-%m-%d").to_string()
    }
}

impl Charge {
    pub fn display_amount(&self) -> String {
        format_amount(self.amount, &self.currency)
    }

    pub fn display_date(&self) -> String {
        self.created.format("%Y-%m-%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_render_in_major_units() {
        assert_eq!(format_amount(999, "usd"), "9.99 USD");
        assert_eq!(format_amount(1200, "jpy"), "1200 JPY");
    }
}
