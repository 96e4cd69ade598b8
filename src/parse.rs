//! Free-form cell text parsing and hour-label normalization.
//!
//! The monitoring portal renders numbers inside arbitrary text ("1,234.5 NTU")
//! and hour headers with inconsistent spacing and zero padding. Both sides of
//! any header comparison must go through [`normalize_hour_label`] so that
//! computed labels and scraped labels share one canonical form.

use std::sync::OnceLock;

use chrono::{Duration, NaiveDateTime, Timelike};
use regex::Regex;

fn numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").expect("numeric regex is valid"))
}

fn hour_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d{1,2}):(\d{2})\s*([AP]M)").expect("hour label regex is valid")
    })
}

/// Extracts the first numeric token from free-form cell text.
///
/// Absence of a number is a normal outcome, not an error: blank cells and
/// status strings simply yield `None`.
pub fn parse_numeric(cell_text: &str) -> Option<f64> {
    let text = cell_text.trim();
    if text.is_empty() {
        return None;
    }

    let matched = numeric_re().find(text)?;
    matched.as_str().replace(',', "").parse::<f64>().ok()
}

/// Canonicalizes an hour header like `"  9:00   am "` to `"9:00 AM"`.
///
/// Returns an empty string when no time pattern is present.
pub fn normalize_hour_label(raw_text: &str) -> String {
    let text = raw_text.split_whitespace().collect::<Vec<_>>().join(" ");

    let Some(caps) = hour_label_re().captures(&text) else {
        return String::new();
    };

    let hour: u32 = caps[1].parse().unwrap_or(0);
    let minute = &caps[2];
    let meridiem = caps[3].to_uppercase();
    format!("{hour}:{minute} {meridiem}")
}

/// The hour label the portal should be displaying for a clock reading taken
/// `delay_minutes` ago. The portal fills each hour's column a few minutes
/// after the hour, so readings lag wall-clock time by a configured delay.
pub fn target_hour_label(now: NaiveDateTime, delay_minutes: i64) -> String {
    let expected = now - Duration::minutes(delay_minutes);
    let (is_pm, hour) = expected.hour12();
    format!("{}:00 {}", hour, if is_pm { "PM" } else { "AM" })
}

/// The hour-truncated slot matching [`target_hour_label`] for the same inputs.
pub fn target_slot(now: NaiveDateTime, delay_minutes: i64) -> NaiveDateTime {
    let expected = now - Duration::minutes(delay_minutes);
    truncate_to_hour(expected)
}

/// Canonical hour label for an already-truncated slot.
pub fn hour_label(slot: NaiveDateTime) -> String {
    let (is_pm, hour) = slot.hour12();
    format!("{}:00 {}", hour, if is_pm { "PM" } else { "AM" })
}

/// Zeroes minute, second and sub-second fields.
pub fn truncate_to_hour(value: NaiveDateTime) -> NaiveDateTime {
    value
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn parse_numeric_extracts_grouped_value_with_unit() {
        assert_eq!(parse_numeric("1,234.5 NTU"), Some(1234.5));
    }

    #[test]
    fn parse_numeric_handles_negative_and_plain_values() {
        assert_eq!(parse_numeric("-3.2"), Some(-3.2));
        assert_eq!(parse_numeric("  42 "), Some(42.0));
    }

    #[test]
    fn parse_numeric_returns_none_without_digits() {
        assert_eq!(parse_numeric(""), None);
        assert_eq!(parse_numeric("   "), None);
        assert_eq!(parse_numeric("OFFLINE"), None);
        assert_eq!(parse_numeric("n/a"), None);
    }

    #[test]
    fn normalize_hour_label_collapses_whitespace_and_case() {
        assert_eq!(normalize_hour_label("  9:00   AM "), "9:00 AM");
        assert_eq!(normalize_hour_label("9:00 am"), "9:00 AM");
        assert_eq!(normalize_hour_label("09:00 pm"), "9:00 PM");
    }

    #[test]
    fn normalize_hour_label_without_time_pattern_is_empty() {
        assert_eq!(normalize_hour_label("Dam Level"), "");
        assert_eq!(normalize_hour_label(""), "");
    }

    #[test]
    fn target_hour_label_applies_delay() {
        assert_eq!(target_hour_label(at(14, 7), 12), "1:00 PM");
        assert_eq!(target_hour_label(at(0, 30), 12), "12:00 AM");
    }

    #[test]
    fn target_slot_truncates_to_hour() {
        let slot = target_slot(at(14, 7), 12);
        assert_eq!(slot, at(13, 0));
    }

    #[test]
    fn target_functions_are_pure() {
        let now = at(14, 7);
        assert_eq!(target_hour_label(now, 12), target_hour_label(now, 12));
        assert_eq!(target_slot(now, 12), target_slot(now, 12));
    }
}
