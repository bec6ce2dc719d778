// 🔢 Value Normalizer
// Dates (ISO / Korean dotted / US slashed / Excel serial) and amounts (₩, 원, thousands separators)

use crate::model::Cell;
use chrono::{DateTime, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

/// Days between 1900-01-01 (Excel epoch) and 1970-01-01.
/// Excel's 1900 leap-year bug is deliberately left uncorrected.
pub const EXCEL_EPOCH_OFFSET_DAYS: f64 = 25569.0;

const MILLIS_PER_DAY: f64 = 86_400.0 * 1000.0;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m-%d-%Y"];

fn leading_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").expect("invalid number regex")
    })
}

fn digit_group_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\d,]+").expect("invalid digit group regex"))
}

// ============================================================================
// DATES
// ============================================================================

/// Convert an Excel day serial to a calendar date (44927 → 2023-01-01)
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() {
        return None;
    }
    let millis = ((serial - EXCEL_EPOCH_OFFSET_DAYS) * MILLIS_PER_DAY).round();
    if millis.abs() > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_millis(millis as i64).map(|dt| dt.date_naive())
}

/// Parse a statement date cell.
///
/// Numbers are Excel serials. Text has `.` and `/` normalized to `-` and is then
/// read as year-first, US month-first, or compact `YYYYMMDD`; a trailing time
/// part (`2024-01-15 13:45:10`) is ignored. Empty, zero and unparseable input → None.
pub fn parse_date(value: &Cell) -> Option<NaiveDate> {
    match value {
        Cell::Number(serial) if *serial != 0.0 => excel_serial_to_date(*serial),
        Cell::Number(_) | Cell::Empty => None,
        Cell::Text(text) => parse_date_text(text),
    }
}

fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let cleaned: String = trimmed
        .chars()
        .map(|c| if c == '.' || c == '/' { '-' } else { c })
        .collect();

    let date_part = cleaned
        .split(|c: char| c.is_whitespace() || c == 'T')
        .next()
        .unwrap_or("")
        .trim_end_matches('-');

    if date_part.len() == 8 && date_part.bytes().all(|b| b.is_ascii_digit()) {
        return compact_date(date_part);
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// YYYYMMDD
fn compact_date(digits: &str) -> Option<NaiveDate> {
    let year = digits[0..4].parse().ok()?;
    let month = digits[4..6].parse().ok()?;
    let day = digits[6..8].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

// ============================================================================
// AMOUNTS
// ============================================================================

/// Parse an amount cell.
///
/// Numbers pass through unchanged (except 0/NaN, which count as missing).
/// Text loses thousands separators, `₩` and the `원` suffix, and its leading
/// numeric part is read. Returns None when nothing numeric remains, and for a
/// zero in either form.
pub fn parse_amount(value: &Cell) -> Option<f64> {
    match value {
        Cell::Number(n) if *n != 0.0 && n.is_finite() => Some(*n),
        Cell::Number(_) | Cell::Empty => None,
        Cell::Text(text) => parse_amount_text(text),
    }
}

fn parse_amount_text(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, ',' | '₩' | '원'))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    leading_number_re()
        .find(cleaned)
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|n| n.is_finite() && *n != 0.0)
}

/// Parse a balance cell, taking the last number in the text.
/// Merged statement lines look like "380,000원 503원", where the balance is last.
pub fn parse_balance(value: &Cell) -> Option<f64> {
    match value {
        Cell::Number(n) if *n != 0.0 && n.is_finite() => Some(*n),
        Cell::Number(_) | Cell::Empty => None,
        Cell::Text(text) => digit_group_re()
            .find_iter(text)
            .last()
            .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok()),
    }
}
