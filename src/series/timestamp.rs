use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::error::{AppError, Result};

/// 0001-01-01T00:00:00Z; epoch values below this are rejected.
pub const MIN_EPOCH_SECONDS: i64 = -62_135_596_800;
/// 9999-12-31T23:59:59Z; epoch values above this are read as milliseconds instead.
pub const MAX_EPOCH_SECONDS: i64 = 253_402_300_799;

const TEXT_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M",
    "%y/%m/%d %H:%M",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// Any of the representations upstream feeds and persisted files use for a point in time.
#[derive(Debug, Clone, PartialEq)]
pub enum TimestampLike {
    Instant(DateTime<Utc>),
    EpochInt(i64),
    EpochFloat(f64),
    Text(String),
}

impl TimestampLike {
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(TimestampLike::EpochInt)
                .or_else(|| n.as_f64().map(TimestampLike::EpochFloat)),
            Value::String(s) => Some(TimestampLike::Text(s.clone())),
            _ => None,
        }
    }

    /// Resolve to an absolute UTC instant. Naive date-times are taken to be UTC.
    pub fn resolve(&self) -> Result<DateTime<Utc>> {
        match self {
            TimestampLike::Instant(instant) => Ok(*instant),
            TimestampLike::EpochInt(value) => {
                from_epoch_int(*value).ok_or_else(|| AppError::invalid_timestamp(value.to_string()))
            }
            TimestampLike::EpochFloat(value) => from_epoch_float(*value)
                .ok_or_else(|| AppError::invalid_timestamp(value.to_string())),
            TimestampLike::Text(raw) => parse_text(raw),
        }
    }
}

impl From<DateTime<Utc>> for TimestampLike {
    fn from(value: DateTime<Utc>) -> Self {
        TimestampLike::Instant(value)
    }
}

impl From<NaiveDateTime> for TimestampLike {
    fn from(value: NaiveDateTime) -> Self {
        TimestampLike::Instant(value.and_utc())
    }
}

impl From<i64> for TimestampLike {
    fn from(value: i64) -> Self {
        TimestampLike::EpochInt(value)
    }
}

impl From<i32> for TimestampLike {
    fn from(value: i32) -> Self {
        TimestampLike::EpochInt(i64::from(value))
    }
}

impl From<f64> for TimestampLike {
    fn from(value: f64) -> Self {
        TimestampLike::EpochFloat(value)
    }
}

impl From<&str> for TimestampLike {
    fn from(value: &str) -> Self {
        TimestampLike::Text(value.to_string())
    }
}

impl From<String> for TimestampLike {
    fn from(value: String) -> Self {
        TimestampLike::Text(value)
    }
}

fn from_epoch_int(value: i64) -> Option<DateTime<Utc>> {
    if (MIN_EPOCH_SECONDS..=MAX_EPOCH_SECONDS).contains(&value) {
        return DateTime::from_timestamp(value, 0);
    }
    let seconds = value.div_euclid(1000);
    if (MIN_EPOCH_SECONDS..=MAX_EPOCH_SECONDS).contains(&seconds) {
        DateTime::from_timestamp_millis(value)
    } else {
        None
    }
}

fn from_epoch_float(value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() {
        return None;
    }
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        return from_epoch_int(value as i64);
    }
    seconds_to_instant(value).or_else(|| seconds_to_instant(value / 1000.0))
}

fn seconds_to_instant(seconds: f64) -> Option<DateTime<Utc>> {
    if seconds < MIN_EPOCH_SECONDS as f64 || seconds >= (MAX_EPOCH_SECONDS + 1) as f64 {
        return None;
    }
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as u32;
    if nanos >= 1_000_000_000 {
        DateTime::from_timestamp(whole as i64 + 1, 0)
    } else {
        DateTime::from_timestamp(whole as i64, nanos)
    }
}

fn parse_text(raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_timestamp(raw));
    }

    if let Ok(value) = trimmed.parse::<i64>() {
        return from_epoch_int(value).ok_or_else(|| AppError::invalid_timestamp(raw));
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return from_epoch_float(value).ok_or_else(|| AppError::invalid_timestamp(raw));
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    for format in TEXT_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                return Ok(naive.and_utc());
            }
        }
    }

    Err(AppError::invalid_timestamp(raw))
}
