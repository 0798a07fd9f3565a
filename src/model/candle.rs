use chrono::{DateTime, Utc};
use serde::Serialize;

use super::bar::{BarSnapshot, BarValues};
use crate::error::AppError;

/// Floor for the high-low range so flat bars do not divide by zero.
const MIN_CANDLE_HEIGHT: f64 = 1e-7;

const STRONG_WICK_PCT: f64 = 0.75;
const LONG_WICK_PCT: f64 = 0.4;
const SHORT_WICK_PCT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpreadType {
    Bullish,
    Bearish,
    NoPriceChange,
}

impl SpreadType {
    fn from_spread(spread: f64) -> Self {
        if spread > 0.0 {
            Self::Bullish
        } else if spread < 0.0 {
            Self::Bearish
        } else {
            Self::NoPriceChange
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShapeType {
    StrongShootingStar,
    WeakShootingStar,
    StrongHammer,
    WeakHammer,
    LongLeggedDoji,
    AverageShape,
}

impl ShapeType {
    /// Hammers and shooting stars, the reversal shapes that can flag an anomaly.
    pub fn is_reversal(self) -> bool {
        matches!(
            self,
            Self::StrongHammer | Self::StrongShootingStar | Self::WeakHammer | Self::WeakShootingStar
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StrongShootingStar => "STRONG_SHOOTING_STAR",
            Self::WeakShootingStar => "WEAK_SHOOTING_STAR",
            Self::StrongHammer => "STRONG_HAMMER",
            Self::WeakHammer => "WEAK_HAMMER",
            Self::LongLeggedDoji => "LONG_LEGGED_DOJI",
            Self::AverageShape => "AVERAGE_SHAPE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CandleShape {
    pub shape_type: ShapeType,
    pub upper_wick_pct: f64,
    pub lower_wick_pct: f64,
}

impl CandleShape {
    pub fn classify(high: f64, low: f64, open: f64, close: f64, spread_type: SpreadType) -> Self {
        let (upper_wick, lower_wick) = if spread_type == SpreadType::Bullish {
            (high - close, open - low)
        } else {
            (high - open, close - low)
        };

        let candle_height = (high - low).max(MIN_CANDLE_HEIGHT);
        let upper_wick_pct = upper_wick / candle_height;
        let lower_wick_pct = lower_wick / candle_height;

        let shape_type = if upper_wick_pct > STRONG_WICK_PCT {
            ShapeType::StrongShootingStar
        } else if upper_wick_pct > LONG_WICK_PCT && lower_wick_pct < SHORT_WICK_PCT {
            ShapeType::WeakShootingStar
        } else if lower_wick_pct > STRONG_WICK_PCT {
            ShapeType::StrongHammer
        } else if lower_wick_pct > LONG_WICK_PCT && upper_wick_pct < SHORT_WICK_PCT {
            ShapeType::WeakHammer
        } else if lower_wick_pct > LONG_WICK_PCT && upper_wick_pct > LONG_WICK_PCT {
            ShapeType::LongLeggedDoji
        } else {
            ShapeType::AverageShape
        };

        Self {
            shape_type,
            upper_wick_pct,
            lower_wick_pct,
        }
    }
}

/// One classified OHLCV bar. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candle {
    high: f64,
    low: f64,
    open: f64,
    close: f64,
    volume: f64,
    time: DateTime<Utc>,
    spread: f64,
    spread_size: f64,
    spread_type: SpreadType,
    shape: CandleShape,
}

impl Candle {
    pub fn from_snapshot(bar: &BarSnapshot) -> Self {
        Self::from_ohlcv(bar.high, bar.low, bar.open, bar.close, bar.volume, bar.time)
    }

    pub fn from_values(values: &BarValues) -> Result<Self, AppError> {
        Ok(Self::from_snapshot(&BarSnapshot::from_values(values)?))
    }

    pub fn from_ohlcv(
        high: f64,
        low: f64,
        open: f64,
        close: f64,
        volume: f64,
        time: DateTime<Utc>,
    ) -> Self {
        let spread = close - open;
        let spread_type = SpreadType::from_spread(spread);
        Self {
            high,
            low,
            open,
            close,
            volume,
            time,
            spread,
            spread_size: spread.abs(),
            spread_type,
            shape: CandleShape::classify(high, low, open, close, spread_type),
        }
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn open(&self) -> f64 {
        self.open
    }

    pub fn close(&self) -> f64 {
        self.close
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn spread(&self) -> f64 {
        self.spread
    }

    pub fn spread_size(&self) -> f64 {
        self.spread_size
    }

    pub fn spread_type(&self) -> SpreadType {
        self.spread_type
    }

    pub fn shape(&self) -> &CandleShape {
        &self.shape
    }

    pub fn shape_type(&self) -> ShapeType {
        self.shape.shape_type
    }
}
