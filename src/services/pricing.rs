//! Localised plan prices. Amounts are kept in the currency's minor unit.

/// Languages whose number format uses a decimal comma and a trailing symbol.
const COMMA_DECIMAL_LANGUAGES: &[&str] = &["de", "fr", "es", "it", "nl", "pt", "fi", "sv", "da", "nb", "pl"];

const EUROZONE: &[&str] = &[
    "at", "be", "cy", "de", "ee", "es", "fi", "fr", "gr", "ie", "it", "lt", "lu", "lv", "mt",
    "nl", "pt", "si", "sk",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale {
    pub language: String,
    pub country: Option<String>,
}

impl Locale {
    /// Parses `en-GB`, `en_gb` or `de`.
    pub fn parse(tag: &str) -> Option<Self> {
        let tag = tag.trim();
        if tag.is_empty() || tag == "none" || tag == "*" {
            return None;
        }
        let mut parts = tag.split(['-', '_']);
        let language = parts.next()?.to_ascii_lowercase();
        if language.is_empty() || !language.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        let country = parts
            .next()
            .filter(|c| !c.is_empty())
            .map(|c| c.to_ascii_lowercase());
        Some(Self { language, country })
    }

    /// First entry of an `Accept-Language` header.
    pub fn from_accept_language(header: &str) -> Option<Self> {
        let first = header.split(',').next()?;
        Self::parse(first.split(';').next().unwrap_or(first))
    }

    pub fn tag(&self) -> String {
        match &self.country {
            Some(country) => format!("{}-{}", self.language, country.to_ascii_uppercase()),
            None => self.language.clone(),
        }
    }

    fn uses_decimal_comma(&self) -> bool {
        COMMA_DECIMAL_LANGUAGES.contains(&self.language.as_str())
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            country: Some("us".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Currency {
    Usd,
    Gbp,
    Eur,
    Cad,
    Aud,
    Jpy,
}

/// Plan prices in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceTable {
    pub monthly: i64,
    pub annual: i64,
    /// First-month promotional price shown on the landing page.
    pub half: i64,
}

impl Currency {
    pub fn for_country(country: &str) -> Self {
        let country = country.to_ascii_lowercase();
        match country.as_str() {
            "gb" | "uk" => Currency::Gbp,
            "ca" => Currency::Cad,
            "au" => Currency::Aud,
            "jp" => Currency::Jpy,
            c if EUROZONE.contains(&c) => Currency::Eur,
            _ => Currency::Usd,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "usd",
            Currency::Gbp => "gbp",
            Currency::Eur => "eur",
            Currency::Cad => "cad",
            Currency::Aud => "aud",
            Currency::Jpy => "jpy",
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Usd => "$",
            Currency::Gbp => "£",
            Currency::Eur => "€",
            Currency::Cad => "CA$",
            Currency::Aud => "A$",
            Currency::Jpy => "¥",
        }
    }

    pub fn minor_digits(&self) -> u32 {
        match self {
            Currency::Jpy => 0,
            _ => 2,
        }
    }

    pub fn prices(&self) -> PriceTable {
        match self {
            Currency::Usd => PriceTable { monthly: 999, annual: 9999, half: 499 },
            Currency::Gbp => PriceTable { monthly: 899, annual: 8999, half: 449 },
            Currency::Eur => PriceTable { monthly: 999, annual: 9999, half: 499 },
            Currency::Cad => PriceTable { monthly: 1299, annual: 12999, half: 649 },
            Currency::Aud => PriceTable { monthly: 1399, annual: 13999, half: 699 },
            Currency::Jpy => PriceTable { monthly: 1200, annual: 12000, half: 600 },
        }
    }
}

/// Formats a minor-unit amount the way the locale writes currency:
/// `£8.99` for en-GB, `99,99 €` for de-DE.
pub fn format_price(amount: i64, currency: Currency, locale: &Locale) -> String {
    let (group_sep, decimal_sep) = if locale.uses_decimal_comma() {
        ('.', ',')
    } else {
        (',', '.')
    };

    let digits = currency.minor_digits();
    let scale = 10_i64.pow(digits);
    let major = amount.abs() / scale;
    let minor = amount.abs() % scale;

    let mut number = group_thousands(major, group_sep);
    if digits > 0 {
        number.push(decimal_sep);
        number.push_str(&format!("{:0width$}", minor, width = digits as usize));
    }
    let sign = if amount < 0 { "-" } else { "" };

    if locale.uses_decimal_comma() {
        format!("{}{} {}", sign, number, currency.symbol())
    } else {
        format!("{}{}{}", sign, currency.symbol(), number)
    }
}

fn group_thousands(value: i64, separator: char) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(c);
    }
    out
}

/// Applies a referral discount, rounding down to the minor unit.
pub fn discounted(amount: i64, percent_off: u32) -> i64 {
    let percent_off = i64::from(percent_off.min(100));
    amount * (100 - percent_off) / 100
}

/// Everything a pricing page shows for one visitor.
#[derive(Debug, Clone)]
pub struct PlanPrices {
    pub currency: Currency,
    pub month: String,
    pub year: String,
    pub annual_month: String,
    pub half: String,
    pub month_discounted: String,
    pub year_discounted: String,
    pub month_discounted_minor: i64,
    pub year_discounted_minor: i64,
}

impl PlanPrices {
    /// `pricing_locale` picks the currency; `display_locale` picks the number format.
    pub fn new(pricing_locale: &Locale, display_locale: &Locale, percent_off: u32) -> Self {
        let currency = Currency::for_country(pricing_locale.country.as_deref().unwrap_or("us"));
        let table = currency.prices();
        let month_discounted_minor = discounted(table.monthly, percent_off);
        let year_discounted_minor = discounted(table.annual, percent_off);
        let fmt = |amount| format_price(amount, currency, display_locale);

        Self {
            currency,
            month: fmt(table.monthly),
            year: fmt(table.annual),
            annual_month: fmt(table.annual / 12),
            half: fmt(table.half),
            month_discounted: fmt(month_discounted_minor),
            year_discounted: fmt(year_discounted_minor),
            month_discounted_minor,
            year_discounted_minor,
        }
    }

    pub fn for_locale(locale: &Locale, percent_off: u32) -> Self {
        Self::new(locale, locale, percent_off)
    }
}
