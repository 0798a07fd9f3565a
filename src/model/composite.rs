use chrono::{DateTime, DurationRound, Utc};

use super::bar::{BarSnapshot, BarValues};
use super::candle::Candle;
use super::resolution::Resolution;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeState {
    Building,
    Complete,
}

/// Folds consecutive native bars into one bar of a longer resolution.
#[derive(Debug, Clone)]
pub struct CompositeCandle {
    resolution: Resolution,
    ratio: u32,
    sub_count: u32,
    period_start: Option<DateTime<Utc>>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    time: Option<DateTime<Utc>>,
    candle: Option<Candle>,
}

impl CompositeCandle {
    pub fn new(resolution: Resolution) -> Result<Self, AppError> {
        Ok(Self {
            resolution,
            ratio: resolution.composite_ratio()?,
            sub_count: 0,
            period_start: None,
            open: 0.0,
            high: 0.0,
            low: 0.0,
            close: 0.0,
            volume: 0.0,
            time: None,
            candle: None,
        })
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn ratio(&self) -> u32 {
        self.ratio
    }

    pub fn sub_count(&self) -> u32 {
        self.sub_count
    }

    pub fn state(&self) -> CompositeState {
        if self.candle.is_some() {
            CompositeState::Complete
        } else {
            CompositeState::Building
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state() == CompositeState::Complete
    }

    /// The finished candle, available once every sub-bar has been folded in.
    pub fn candle(&self) -> Option<&Candle> {
        self.candle.as_ref()
    }

    pub fn into_candle(self) -> Option<Candle> {
        self.candle
    }

    pub fn add_sub_candle(&mut self, values: &BarValues) -> Result<CompositeState, AppError> {
        let bar = BarSnapshot::from_values(values)?;
        self.add_sub_bar(&bar)
    }

    pub fn add_sub_bar(&mut self, bar: &BarSnapshot) -> Result<CompositeState, AppError> {
        if self.is_complete() {
            return Err(AppError::InvalidState(format!(
                "{} composite candle already complete with {} sub-bars",
                self.resolution, self.sub_count
            )));
        }

        let sub_period = period_start(bar.time, self.resolution)?;
        match self.period_start {
            None => {
                self.period_start = Some(sub_period);
                self.open = bar.open;
                self.high = bar.high;
                self.low = bar.low;
                self.close = bar.close;
                self.volume = bar.volume;
                self.time = Some(bar.time);
            }
            Some(start) if start != sub_period => {
                return Err(AppError::InvalidState(format!(
                    "sub-bar at {} is outside the {} period starting {}",
                    bar.time, self.resolution, start
                )));
            }
            Some(_) => {
                self.high = self.high.max(bar.high);
                self.low = self.low.min(bar.low);
                self.close = bar.close;
                self.volume += bar.volume;
            }
        }

        self.sub_count += 1;
        if self.sub_count == self.ratio {
            let time = self.time.unwrap_or(bar.time);
            self.candle = Some(Candle::from_ohlcv(
                self.high,
                self.low,
                self.open,
                self.close,
                self.volume,
                time,
            ));
        }
        Ok(self.state())
    }
}

/// Start of the resolution period containing `time`.
pub fn period_start(time: DateTime<Utc>, resolution: Resolution) -> Result<DateTime<Utc>, AppError> {
    time.duration_trunc(resolution.duration())
        .map_err(|e| AppError::InvalidState(format!("cannot align {} to {}: {}", time, resolution, e)))
}
