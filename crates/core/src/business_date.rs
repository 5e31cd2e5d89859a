use chrono::{Datelike, NaiveDate};
use thiserror::Error;

/// Weekday names indexed by days since Sunday.
const WEEKDAY_NAMES: [&str; 7] = ["日", "月", "火", "水", "木", "金", "土"];

/// Machine form stored in the database and used in file names.
pub fn format_db(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Long display form, e.g. `2025年11月18日(火)`.
pub fn format_view(date: NaiveDate) -> String {
    let weekday = WEEKDAY_NAMES[date.weekday().num_days_from_sunday() as usize];
    format!("{}({weekday})", date.format("%Y年%m月%d日"))
}

/// Parses a user supplied `YYYY-MM-DD` value, ignoring surrounding whitespace.
pub fn parse_input(raw: &str) -> Result<NaiveDate, BusinessDateError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(BusinessDateError::Missing);
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| BusinessDateError::Malformed(trimmed.to_string()))
}

/// Digits-only form used in export file names.
pub fn compact(date_db: &str) -> String {
    date_db.replace('-', "")
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusinessDateError {
    #[error("business date is required")]
    Missing,
    #[error("business date must be YYYY-MM-DD (got {0})")]
    Malformed(String),
}
