use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::AppError;

pub const FIELD_HIGH: &str = "BID_HIGH";
pub const FIELD_LOW: &str = "BID_LOW";
pub const FIELD_OPEN: &str = "BID_OPEN";
pub const FIELD_CLOSE: &str = "BID_CLOSE";
pub const FIELD_VOLUME: &str = "CONS_TICK_COUNT";
pub const FIELD_TIME: &str = "UTM";
pub const FIELD_COMPLETE: &str = "CONS_END";

/// Raw field map of one bar as delivered by the feed.
pub type BarValues = HashMap<String, String>;

/// Numeric snapshot of one bar's raw fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarSnapshot {
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub close: f64,
    pub volume: f64,
    pub time: DateTime<Utc>,
}

impl BarSnapshot {
    pub fn from_values(values: &BarValues) -> Result<Self, AppError> {
        Ok(Self {
            high: number_field(values, FIELD_HIGH)?,
            low: number_field(values, FIELD_LOW)?,
            open: number_field(values, FIELD_OPEN)?,
            close: number_field(values, FIELD_CLOSE)?,
            volume: number_field(values, FIELD_VOLUME)?,
            time: time_field(values, FIELD_TIME)?,
        })
    }

    /// Inverse of [`BarSnapshot::from_values`], used when replaying history
    /// through the same path as live bars.
    pub fn to_values(&self) -> BarValues {
        let mut values = BarValues::new();
        values.insert(FIELD_HIGH.to_string(), self.high.to_string());
        values.insert(FIELD_LOW.to_string(), self.low.to_string());
        values.insert(FIELD_OPEN.to_string(), self.open.to_string());
        values.insert(FIELD_CLOSE.to_string(), self.close.to_string());
        values.insert(FIELD_VOLUME.to_string(), self.volume.to_string());
        values.insert(
            FIELD_TIME.to_string(),
            self.time.timestamp_millis().to_string(),
        );
        values
    }
}

fn raw_field<'a>(values: &'a BarValues, field: &str) -> Result<&'a str, AppError> {
    values
        .get(field)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::parse(field, "<missing>"))
}

fn number_field(values: &BarValues, field: &str) -> Result<f64, AppError> {
    let raw = raw_field(values, field)?;
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(AppError::parse(field, raw)),
    }
}

fn time_field(values: &BarValues, field: &str) -> Result<DateTime<Utc>, AppError> {
    let raw = raw_field(values, field)?;
    let millis = match raw.parse::<i64>() {
        Ok(ms) => ms,
        Err(_) => match raw.parse::<f64>() {
            Ok(ms) if ms.is_finite() => ms as i64,
            _ => return Err(AppError::parse(field, raw)),
        },
    };
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| AppError::parse(field, raw))
}
