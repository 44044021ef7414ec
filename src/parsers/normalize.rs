//! Normalization helpers shared by every dialect.
//!
//! None of these fail: unusable input yields `None` (or `false` for flags).

use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

/// Day-first numeric formats, then ISO. First successful parse wins.
const DATE_FORMATS: &[&str] = &["%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y", "%Y-%m-%d"];

const DATETIME_FORMATS: &[&str] = &[
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y %H.%M",
    "%d-%m-%Y %H:%M",
    "%d.%m.%Y %H:%M",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// Tokens that switch the extra-insurance flag on. Anything else is `false`.
const INSURANCE_YES: &[&str] = &["yes", "true", "included", "ναι", "1"];

/// Collapse every whitespace run (newlines included) into one space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Unify line endings and trim each line, keeping line structure.
pub fn normalize_lines(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a calendar date, ignoring any trailing time component.
///
/// Two-digit years are read as 20xx.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let token = s.split_whitespace().next()?;
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(token, fmt).ok())
        .and_then(widen_short_year)
}

/// Parse a date with an optional time. Date-only input maps to midnight.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .and_then(|dt| widen_short_year(dt.date()).map(|d| d.and_time(dt.time())))
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

fn widen_short_year(date: NaiveDate) -> Option<NaiveDate> {
    if date.year() < 100 {
        date.with_year(date.year() + 2000)
    } else {
        Some(date)
    }
}

/// Parse a monetary amount into a fixed-point decimal.
///
/// Comma or dot may be the decimal separator. When both appear the dot is a
/// thousands separator: `1.234,56` → `1234.56`.
pub fn parse_money(s: &str) -> Option<Decimal> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let cleaned = if cleaned.contains(',') && cleaned.contains('.') {
        cleaned.replace('.', "")
    } else {
        cleaned
    };
    Decimal::from_str(&cleaned.replace(',', ".")).ok()
}

/// Interpret an extra-insurance value. Unknown or absent means no insurance.
pub fn parse_insurance_flag(s: &str) -> bool {
    s.split_whitespace()
        .next()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .is_some_and(|word| INSURANCE_YES.contains(&word.as_str()))
}

/// Map a rental-industry (ACRISS) class code to a coarse fleet category by
/// its first letter.
pub fn category_from_class_code(code: &str) -> Option<&'static str> {
    let lead = code.trim().chars().next()?.to_ascii_uppercase();
    match lead {
        'M' | 'N' => Some("Mini"),
        'E' => Some("Economy"),
        'C' => Some("Compact"),
        'I' => Some("Intermediate"),
        'S' => Some("Standard"),
        'F' => Some("Fullsize"),
        'P' => Some("Premium"),
        'L' => Some("Luxury"),
        'X' => Some("SUV"),
        _ => None,
    }
}

/// Keep at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn day_first_and_iso_dates_agree() {
        let expected = NaiveDate::from_ymd_opt(2025, 8, 18);
        assert_eq!(parse_date("18/08/2025"), expected);
        assert_eq!(parse_date("18-08-2025"), expected);
        assert_eq!(parse_date("18.08.2025"), expected);
        assert_eq!(parse_date("2025-08-18"), expected);
        assert_eq!(parse_date(" 18/08/2025 10:30 "), expected);
    }

    #[test]
    fn impossible_dates_are_none() {
        assert_eq!(parse_date("31-02-2025"), None);
        assert_eq!(parse_date("tomorrow"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn two_digit_years_widen() {
        assert_eq!(parse_date("09-08-25"), NaiveDate::from_ymd_opt(2025, 8, 9));
    }

    #[test]
    fn datetimes_keep_time_or_default_to_midnight() {
        let dt = parse_datetime("18/08/2025 10:30").unwrap();
        assert_eq!(dt.to_string(), "2025-08-18 10:30:00");
        let dt = parse_datetime("18/08/2025 10.30").unwrap();
        assert_eq!(dt.to_string(), "2025-08-18 10:30:00");
        let dt = parse_datetime("2025-08-25").unwrap();
        assert_eq!(dt.to_string(), "2025-08-25 00:00:00");
        assert!(parse_datetime("soon").is_none());
    }

    #[test]
    fn money_with_either_separator() {
        assert_eq!(parse_money("1.234,56"), Some(dec!(1234.56)));
        assert_eq!(parse_money("1234.56"), Some(dec!(1234.56)));
        assert_eq!(parse_money("240,00"), Some(dec!(240.00)));
        assert_eq!(parse_money("EUR 75"), Some(dec!(75)));
        assert_eq!(parse_money("n/a"), None);
    }

    #[test]
    fn money_keeps_scale() {
        assert_eq!(parse_money("240.00").unwrap().to_string(), "240.00");
    }

    #[test]
    fn insurance_tokens() {
        assert!(parse_insurance_flag("Yes"));
        assert!(parse_insurance_flag("TRUE"));
        assert!(parse_insurance_flag("Ναι"));
        assert!(parse_insurance_flag("Included."));
        assert!(!parse_insurance_flag("No"));
        assert!(!parse_insurance_flag("Όχι"));
        assert!(!parse_insurance_flag("maybe"));
        assert!(!parse_insurance_flag(""));
    }

    #[test]
    fn class_code_categories() {
        assert_eq!(category_from_class_code("EDMR"), Some("Economy"));
        assert_eq!(category_from_class_code("cdmr"), Some("Compact"));
        assert_eq!(category_from_class_code("NBMR"), Some("Mini"));
        assert_eq!(category_from_class_code("XFAR"), Some("SUV"));
        assert_eq!(category_from_class_code("ZZZZ"), None);
        assert_eq!(category_from_class_code(""), None);
    }

    #[test]
    fn whitespace_helpers() {
        assert_eq!(collapse_whitespace("a \n\t b   c"), "a b c");
        assert_eq!(normalize_lines("  a  \r\n b\r c "), "a\nb\nc");
        assert_eq!(truncate_chars("Πελάτης", 3), "Πελ");
    }
}
