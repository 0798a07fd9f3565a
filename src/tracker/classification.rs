use serde::Serialize;

use crate::indicator::sliding_stats::WindowStats;
use crate::model::candle::Candle;

/// Volume above `mean + k * std` is high, at or below `mean - k * std` low.
pub const VOLUME_BAND_K: f64 = 1.0;
/// Spread size above `mean + k * std` is wide.
pub const WIDE_SPREAD_K: f64 = 1.0;
/// Spread size at or below `mean - k * std` is narrow.
pub const NARROW_SPREAD_K: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeClass {
    HighVolume,
    AverageVolume,
    LowVolume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpreadClass {
    WideSpread,
    AverageSpread,
    NarrowSpread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub volume_class: VolumeClass,
    pub spread_class: SpreadClass,
    pub is_anomaly: bool,
}

pub fn volume_class(volume: f64, stats: WindowStats) -> VolumeClass {
    if volume > stats.mean + VOLUME_BAND_K * stats.std {
        VolumeClass::HighVolume
    } else if volume <= stats.mean - VOLUME_BAND_K * stats.std {
        VolumeClass::LowVolume
    } else {
        VolumeClass::AverageVolume
    }
}

pub fn spread_class(spread_size: f64, stats: WindowStats) -> SpreadClass {
    if spread_size > stats.mean + WIDE_SPREAD_K * stats.std {
        SpreadClass::WideSpread
    } else if spread_size <= stats.mean - NARROW_SPREAD_K * stats.std {
        SpreadClass::NarrowSpread
    } else {
        SpreadClass::AverageSpread
    }
}

/// Classify a candle against the current window statistics. Only reversal
/// shapes on high volume are anomalies.
pub fn classify(candle: &Candle, volume_stats: WindowStats, spread_stats: WindowStats) -> Classification {
    let volume_class = volume_class(candle.volume(), volume_stats);
    let spread_class = spread_class(candle.spread_size(), spread_stats);
    Classification {
        volume_class,
        spread_class,
        is_anomaly: volume_class == VolumeClass::HighVolume && candle.shape_type().is_reversal(),
    }
}
