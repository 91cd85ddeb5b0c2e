//! Request input and its validation rules.
//!
//! Query string and body (JSON or urlencoded) are merged into one flat map;
//! body values win. Every rule returns the first failure as a 400 with
//! code 3 and the rule's message.

use std::collections::HashMap;
use std::str::FromStr;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
    http::{header, Uri},
};
use base64::{engine::general_purpose::STANDARD, Engine};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{AppError, Result};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*\.[A-Za-z]{2,}$",
    )
    .expect("valid email regex")
});

const PASSWORD_MIN_LENGTH: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct Params {
    values: HashMap<String, String>,
}

impl Params {
    pub fn parse(uri: &Uri, content_type: Option<&str>, body: &[u8]) -> Result<Self> {
        let mut values = HashMap::new();
        if let Some(query) = uri.query() {
            values.extend(url::form_urlencoded::parse(query.as_bytes()).into_owned());
        }

        let content_type = content_type.unwrap_or_default();
        if body.is_empty() {
            // nothing to merge
        } else if content_type.starts_with("application/json") {
            let json: serde_json::Value = serde_json::from_slice(body)
                .map_err(|_| AppError::validation("Invalid JSON body."))?;
            if let serde_json::Value::Object(map) = json {
                for (key, value) in map {
                    let value = match value {
                        serde_json::Value::Null => continue,
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    values.insert(key, value);
                }
            }
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            values.extend(url::form_urlencoded::parse(body).into_owned());
        }

        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn field(&self, name: &str) -> Field<'_> {
        Field {
            value: self.get(name),
        }
    }
}

#[cfg(test)]
impl<const N: usize> From<[(&str, &str); N]> for Params {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl<S> FromRequest<S> for Params
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(request: Request, state: &S) -> Result<Self> {
        let uri = request.uri().clone();
        let content_type = request
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = Bytes::from_request(request, state)
            .await
            .map_err(|e| AppError::new(e.status(), crate::error::code::VALIDATION, e.body_text()))?;

        Self::parse(&uri, content_type.as_deref(), &body)
    }
}

/// One named input and the rules applied to it.
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    value: Option<&'a str>,
}

impl<'a> Field<'a> {
    pub fn value(&self) -> Option<&'a str> {
        self.value
    }

    pub fn exists(self, message: &str) -> Result<Self> {
        match self.value {
            Some(_) => Ok(self),
            None => Err(AppError::validation(message)),
        }
    }

    pub fn not_empty(self, message: &str) -> Result<Self> {
        match self.value {
            Some(v) if !v.is_empty() => Ok(self),
            _ => Err(AppError::validation(message)),
        }
    }

    pub fn trim(self) -> Self {
        Self {
            value: self.value.map(str::trim),
        }
    }

    pub fn alphanumeric(self, message: &str) -> Result<Self> {
        match self.value {
            Some(v) if is_alphanumeric(v) => Ok(self),
            _ => Err(AppError::validation(message)),
        }
    }

    /// Alphanumeric when given; a missing or empty value is accepted.
    pub fn alphanumeric_or_empty(self, message: &str) -> Result<Option<&'a str>> {
        match self.value {
            None | Some("") => Ok(None),
            Some(v) if is_alphanumeric(v) => Ok(Some(v)),
            Some(_) => Err(AppError::validation(message)),
        }
    }

    pub fn length(self, len: usize, message: &str) -> Result<Self> {
        match self.value {
            Some(v) if v.chars().count() == len => Ok(self),
            _ => Err(AppError::validation(message)),
        }
    }

    pub fn is_in(self, allowed: &[&str], message: &str) -> Result<&'a str> {
        match self.value {
            Some(v) if allowed.contains(&v) => Ok(v),
            _ => Err(AppError::validation(message)),
        }
    }

    /// [`Field::is_in`] followed by [`Field::parse`], with one message for both.
    pub fn one_of<T: FromStr>(self, allowed: &[&str], message: &str) -> Result<T> {
        let value = self.is_in(allowed, message)?;
        value.parse().map_err(|_| AppError::validation(message))
    }

    pub fn parse<T: FromStr>(self, message: &str) -> Result<T> {
        self.value
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| AppError::validation(message))
    }

    /// Valid email, returned in normalised form.
    pub fn email(self, message: &str) -> Result<String> {
        match self.value {
            Some(v) if EMAIL.is_match(v) => Ok(normalize_email(v)),
            _ => Err(AppError::validation(message)),
        }
    }

    /// Base64 after control characters are stripped; returns the stripped value.
    pub fn base64(self, message: &str) -> Result<String> {
        let stripped: String = self
            .value
            .unwrap_or_default()
            .chars()
            .filter(|c| !c.is_ascii_control())
            .collect();
        if !stripped.is_empty() && STANDARD.decode(&stripped).is_ok() {
            Ok(stripped)
        } else {
            Err(AppError::validation(message))
        }
    }

    pub fn password(self) -> Result<String> {
        let value = self.value.unwrap_or_default();
        match password_problems(value) {
            None => Ok(value.to_string()),
            Some(sentence) => Err(AppError::validation(sentence)),
        }
    }

    /// Anything but empty, `0` and `false` is true.
    pub fn to_bool(self) -> bool {
        !matches!(self.value, None | Some("") | Some("0") | Some("false"))
    }

    /// Only `1` and `true` are true.
    pub fn to_bool_strict(self) -> bool {
        matches!(self.value, Some("1") | Some("true"))
    }

    pub fn string(self) -> String {
        self.value.unwrap_or_default().to_string()
    }

    /// The value, with empty treated as absent.
    pub fn optional(self) -> Option<String> {
        self.value.filter(|v| !v.is_empty()).map(str::to_string)
    }
}

fn is_alphanumeric(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Lower-cases the address and folds provider-specific aliases onto the
/// base mailbox.
pub fn normalize_email(email: &str) -> String {
    let email = email.trim().to_lowercase();
    let Some((local, domain)) = email.rsplit_once('@') else {
        return email;
    };

    match domain {
        "gmail.com" | "googlemail.com" => {
            let base = local.split('+').next().unwrap_or(local).replace('.', "");
            format!("{}@gmail.com", base)
        }
        "outlook.com" | "hotmail.com" | "live.com" | "icloud.com" | "me.com" => {
            format!("{}@{}", local.split('+').next().unwrap_or(local), domain)
        }
        "yahoo.com" | "ymail.com" => {
            format!("{}@{}", local.split('-').next().unwrap_or(local), domain)
        }
        _ => email,
    }
}

/// `None` when the password satisfies every rule, otherwise one sentence
/// naming each unmet rule.
pub fn password_problems(password: &str) -> Option<String> {
    let min_length = format!("be at least {} letters long", PASSWORD_MIN_LENGTH);
    let checks: [(bool, &str); 5] = [
        (password.chars().count() >= PASSWORD_MIN_LENGTH, &min_length),
        (password.chars().any(|c| c.is_uppercase()), "contain a capital letter"),
        (password.chars().any(|c| c.is_lowercase()), "contain a lowercase letter"),
        (password.chars().any(|c| c.is_ascii_digit()), "contain a number"),
        (
            password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()),
            "contain a special character",
        ),
    ];

    let unmet: Vec<&str> = checks
        .iter()
        .filter(|(ok, _)| !ok)
        .map(|(_, part)| *part)
        .collect();

    match unmet.as_slice() {
        [] => None,
        [only] => Some(format!("Password must {}.", only)),
        [init @ .., last] => Some(format!("Password must {} and {}.", init.join(", "), last)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_overrides_query() {
        let uri: Uri = "/signup?email=query%40example.com&refer=abc".parse().unwrap();
        let params = Params::parse(
            &uri,
            Some("application/x-www-form-urlencoded"),
            b"email=body%40example.com",
        )
        .unwrap();

        assert_eq!(params.get("email"), Some("body@example.com"));
        assert_eq!(params.get("refer"), Some("abc"));
    }

    #[test]
    fn json_scalars_are_stringified() {
        let uri: Uri = "/new-subscription".parse().unwrap();
        let params = Params::parse(
            &uri,
            Some("application/json"),
            br#"{"trial": true, "count": 3, "plan": "all-monthly", "upgrade": null}"#,
        )
        .unwrap();

        assert_eq!(params.get("trial"), Some("true"));
        assert_eq!(params.get("count"), Some("3"));
        assert_eq!(params.get("plan"), Some("all-monthly"));
        assert_eq!(params.get("upgrade"), None);
    }

    #[test]
    fn emails_are_normalised() {
        assert_eq!(normalize_email("John.Smith+vpn@GoogleMail.com"), "johnsmith@gmail.com");
        assert_eq!(normalize_email("someone+tag@hotmail.com"), "someone@hotmail.com");
        assert_eq!(normalize_email("someone-tag@yahoo.com"), "someone@yahoo.com");
        assert_eq!(normalize_email("First.Last+x@Example.org"), "first.last+x@example.org");
    }

    #[test]
    fn email_rule_rejects_garbage() {
        let params = Params::from([("email", "not-an-email"), ("ok", "A@B.io")]);

        let error = params.field("email").email("Invalid email address.").unwrap_err();
        assert_eq!(error.code, crate::error::code::VALIDATION);
        assert_eq!(error.message, "Invalid email address.");
        assert_eq!(params.field("ok").email("Invalid email address.").unwrap(), "a@b.io");
        assert!(params.field("missing").email("Invalid email address.").is_err());
    }

    #[test]
    fn password_sentence_lists_unmet_rules() {
        assert_eq!(password_problems("Abcdefg1!"), None);
        assert_eq!(
            password_problems("abc"),
            Some(
                "Password must be at least 8 letters long, contain a capital letter, \
                 contain a number and contain a special character."
                    .to_string()
            )
        );
        assert_eq!(
            password_problems("ABCDEFGH1!"),
            Some("Password must contain a lowercase letter.".to_string())
        );
    }

    #[test]
    fn booleans() {
        let params = Params::from([("a", "yes"), ("b", "0"), ("c", "true"), ("d", "")]);

        assert!(params.field("a").to_bool());
        assert!(!params.field("b").to_bool());
        assert!(!params.field("d").to_bool());
        assert!(!params.field("missing").to_bool());
        assert!(!params.field("a").to_bool_strict());
        assert!(params.field("c").to_bool_strict());
    }

    #[test]
    fn base64_strips_control_characters() {
        let params = Params::from([("receipt", "aGVs\nbG8=\r"), ("bad", "not base64!")]);

        assert_eq!(params.field("receipt").base64("Invalid receipt data.").unwrap(), "aGVsbG8=");
        assert!(params.field("bad").base64("Invalid receipt data.").is_err());
    }

    #[test]
    fn referral_code_may_be_empty() {
        let params = Params::from([("empty", ""), ("good", "abc123"), ("bad", "abc-123")]);
        let message = "Referral code must be alphanumeric.";

        assert_eq!(params.field("empty").alphanumeric_or_empty(message).unwrap(), None);
        assert_eq!(params.field("missing").alphanumeric_or_empty(message).unwrap(), None);
        assert_eq!(params.field("good").alphanumeric_or_empty(message).unwrap(), Some("abc123"));
        assert!(params.field("bad").alphanumeric_or_empty(message).is_err());
    }
}
