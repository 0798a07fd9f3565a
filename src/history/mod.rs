pub mod ig_rest;
pub mod synthetic;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::bar::BarSnapshot;
use crate::model::resolution::Resolution;

pub use ig_rest::{parse_market_search, IgCredentials, IgRestHistory, MarketSummary};
pub use synthetic::{SeriesParams, SyntheticHistory, SyntheticParams};

/// Timestamp format of historical row keys, e.g. `2024:03:04-10:15:00`.
pub const ROW_TIME_FORMAT: &str = "%Y:%m:%d-%H:%M:%S";

/// Date format of the REST price history request path.
pub const REQUEST_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One historical bar as returned by a [`HistoricalDataSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRow {
    pub timestamp: String,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
}

impl HistoricalRow {
    pub fn time(&self) -> Result<DateTime<Utc>, AppError> {
        NaiveDateTime::parse_from_str(&self.timestamp, ROW_TIME_FORMAT)
            .map(|t| t.and_utc())
            .map_err(|_| AppError::parse("timestamp", self.timestamp.clone()))
    }

    pub fn spread_size(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn to_snapshot(&self) -> Result<BarSnapshot, AppError> {
        Ok(BarSnapshot {
            high: self.high,
            low: self.low,
            open: self.open,
            close: self.close,
            volume: self.volume,
            time: self.time()?,
        })
    }
}

pub fn format_row_time(time: DateTime<Utc>) -> String {
    time.format(ROW_TIME_FORMAT).to_string()
}

/// Source of the bars used to bootstrap a tracker's rolling statistics.
#[async_trait]
pub trait HistoricalDataSource: Send + Sync {
    /// Ordered rows for `epic` at `resolution` between `start` and `end`.
    async fn fetch(
        &self,
        epic: &str,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalRow>, AppError>;
}
