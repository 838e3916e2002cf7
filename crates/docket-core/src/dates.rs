//! Date parsing and display helpers.
//!
//! Dataset dates are messy: ISO timestamps with and without `Z`, US-style
//! dates, already-formatted display strings, epoch numbers and wrapper
//! objects all show up. Every parser here returns `None` on failure; a bad
//! date is treated as an absent date and never raised.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::record::NOT_AVAILABLE;

const ISO_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

const LOOSE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%m-%d-%Y", "%b %d, %Y", "%B %d, %Y"];

/// Display format used in the context pack ("Dec 17, 2014").
pub const DISPLAY_FORMAT: &str = "%b %d, %Y";

/// Parse an ISO-8601 dataset timestamp, with or without a `Z`/offset.
///
/// Naive timestamps are taken as UTC. Falls back to the leading
/// `YYYY-MM-DD` when the time part is unusual.
pub fn parse_iso(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() || s == NOT_AVAILABLE {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = s.trim_end_matches('Z');
    for fmt in ISO_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
            return Some(dt.and_utc());
        }
    }

    naive
        .get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Parse any date-ish JSON value.
///
/// Accepts ISO strings, `MM/DD/YYYY`, `MM-DD-YYYY`, display strings such as
/// `Sep 01, 2013`, epoch numbers (seconds above 1e9, milliseconds above
/// 1e12) and wrapper objects keyed `date`, `$date`, `value` or `timestamp`.
pub fn parse_flexible(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => parse_text(s),
        Value::Number(n) => {
            let v = n.as_f64()?;
            if v > 1e12 {
                DateTime::from_timestamp_millis(v as i64).map(|dt| dt.naive_utc())
            } else if v > 1e9 {
                DateTime::from_timestamp(v as i64, 0).map(|dt| dt.naive_utc())
            } else {
                None
            }
        }
        Value::Object(map) => ["date", "$date", "value", "timestamp"]
            .iter()
            .find_map(|k| map.get(*k))
            .and_then(parse_flexible),
        _ => None,
    }
}

/// Parse a date string in any of the loose formats.
pub fn parse_text(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() || s == NOT_AVAILABLE {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }

    let s = s.replace('Z', "");
    for fmt in ISO_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Some(dt);
        }
    }
    for fmt in LOOSE_DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(&s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    None
}

/// Render a dataset timestamp for people, keeping the raw text when it
/// does not parse.
pub fn format_display(raw: Option<&str>) -> String {
    match raw {
        None => NOT_AVAILABLE.to_string(),
        Some(s) if s.trim().is_empty() || s == NOT_AVAILABLE => NOT_AVAILABLE.to_string(),
        Some(s) => parse_iso(s)
            .map(|dt| dt.format(DISPLAY_FORMAT).to_string())
            .unwrap_or_else(|| s.to_string()),
    }
}

/// Render a dollar amount as `$12,345`, keeping the raw text when it is
/// not a number.
pub fn format_money(raw: Option<&str>) -> String {
    let Some(s) = raw.filter(|s| !s.trim().is_empty() && *s != NOT_AVAILABLE) else {
        return NOT_AVAILABLE.to_string();
    };

    let Ok(amount) = s.trim().parse::<f64>() else {
        return s.to_string();
    };

    let whole = amount.abs().round() as u64;
    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    if amount < 0.0 && whole > 0 {
        format!("-${}", grouped)
    } else {
        format!("${}", grouped)
    }
}
