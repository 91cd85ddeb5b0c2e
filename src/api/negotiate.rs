//! `Accept` header negotiation between the JSON API and the HTML pages.

use axum::http::{header, HeaderMap};

use crate::services::pricing::Locale;

const CANDIDATES: [(&str, &str); 2] = [("application", "json"), ("text", "html")];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Html,
}

struct MediaRange<'a> {
    kind: &'a str,
    subtype: &'a str,
    q: f32,
}

impl<'a> MediaRange<'a> {
    fn parse(entry: &'a str) -> Option<Self> {
        let mut parts = entry.split(';').map(str::trim);
        let (kind, subtype) = parts.next()?.split_once('/')?;
        let mut q = 1.0;
        for param in parts {
            if let Some(value) = param.strip_prefix("q=") {
                q = value.trim().parse().unwrap_or(0.0);
            }
        }
        Some(Self { kind, subtype, q })
    }

    /// Higher is more specific; `None` when the range does not match.
    fn specificity(&self, kind: &str, subtype: &str) -> Option<u8> {
        match (self.kind, self.subtype) {
            (k, s) if k.eq_ignore_ascii_case(kind) && s.eq_ignore_ascii_case(subtype) => Some(2),
            (k, "*") if k.eq_ignore_ascii_case(kind) => Some(1),
            ("*", "*") => Some(0),
            _ => None,
        }
    }
}

/// Picks the response format for a request. A missing or unparseable
/// `Accept` header means JSON; on equal quality JSON wins.
pub fn preferred_format(headers: &HeaderMap) -> Format {
    let Some(accept) = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) else {
        return Format::Json;
    };
    let ranges: Vec<MediaRange> = accept.split(',').filter_map(MediaRange::parse).collect();
    if ranges.is_empty() {
        return Format::Json;
    }

    let quality = |(kind, subtype): (&str, &str)| {
        ranges
            .iter()
            .filter_map(|r| r.specificity(kind, subtype).map(|s| (s, r.q)))
            .max_by_key(|(s, _)| *s)
            .map(|(_, q)| q)
            .unwrap_or(0.0)
    };

    let json = quality(CANDIDATES[0]);
    let html = quality(CANDIDATES[1]);
    if html > json {
        Format::Html
    } else {
        Format::Json
    }
}

pub fn wants_json(headers: &HeaderMap) -> bool {
    preferred_format(headers) == Format::Json
}

/// The browser's first `Accept-Language` entry.
pub fn browser_locale(headers: &HeaderMap) -> Option<Locale> {
    headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|v| v.to_str().ok())
        .and_then(Locale::from_accept_language)
}
