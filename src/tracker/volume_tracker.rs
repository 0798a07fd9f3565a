use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;

use super::classification::{classify, Classification, VOLUME_BAND_K};
use crate::error::AppError;
use crate::history::{HistoricalDataSource, HistoricalRow};
use crate::indicator::sliding_stats::{SlidingStats, WindowStats};
use crate::model::bar::{BarSnapshot, BarValues};
use crate::model::candle::Candle;
use crate::model::composite::{CompositeCandle, CompositeState};
use crate::model::resolution::Resolution;
use crate::notify::NotificationSink;

/// Number of bars kept in each rolling window and in the candle history.
pub const DEFAULT_WINDOW: usize = 96;

const SUMMARY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    pub window: usize,
    /// Seed the windows from history before live bars arrive.
    pub precalculate: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            precalculate: true,
        }
    }
}

/// Result of running one completed candle through a tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandleAssessment {
    pub candle: Candle,
    #[serde(flatten)]
    pub classification: Classification,
    pub volume_stats: WindowStats,
    pub spread_stats: WindowStats,
}

impl CandleAssessment {
    pub fn is_anomaly(&self) -> bool {
        self.classification.is_anomaly
    }
}

#[derive(Serialize)]
struct AnomalyDetail<'a> {
    time: String,
    name: &'a str,
    epic: &'a str,
    resolution: Resolution,
    #[serde(flatten)]
    assessment: &'a CandleAssessment,
}

/// Rolling volume/spread statistics and anomaly detection for one
/// (instrument, resolution) pair.
pub struct VolumeTracker {
    name: String,
    epic: String,
    resolution: Resolution,
    settings: TrackerSettings,
    volume_stats: SlidingStats,
    spread_stats: SlidingStats,
    candles: VecDeque<Candle>,
    started: bool,
    composite: Option<CompositeCandle>,
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl std::fmt::Debug for VolumeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeTracker")
            .field("name", &self.name)
            .field("epic", &self.epic)
            .field("resolution", &self.resolution)
            .field("started", &self.started)
            .field("candles", &self.candles.len())
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl VolumeTracker {
    pub fn new(
        name: impl Into<String>,
        epic: impl Into<String>,
        resolution: Resolution,
        settings: TrackerSettings,
    ) -> Result<Self, AppError> {
        if settings.window == 0 {
            return Err(AppError::Configuration(
                "tracker window must be > 0".to_string(),
            ));
        }
        if resolution.is_composite() {
            resolution.composite_ratio()?;
        }
        Ok(Self {
            name: name.into(),
            epic: epic.into(),
            resolution,
            settings,
            volume_stats: SlidingStats::new(settings.window),
            spread_stats: SlidingStats::new(settings.window),
            candles: VecDeque::with_capacity(settings.window),
            started: false,
            composite: None,
            sinks: Vec::new(),
        })
    }

    pub fn add_sink(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn epic(&self) -> &str {
        &self.epic
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn volume_stats(&self) -> WindowStats {
        self.volume_stats.snapshot()
    }

    pub fn spread_stats(&self) -> WindowStats {
        self.spread_stats.snapshot()
    }

    pub fn candles(&self) -> impl Iterator<Item = &Candle> {
        self.candles.iter()
    }

    pub fn candle_count(&self) -> usize {
        self.candles.len()
    }

    pub fn last_candle(&self) -> Option<&Candle> {
        self.candles.back()
    }

    /// Sub-bars folded into the in-progress composite candle.
    pub fn pending_sub_bars(&self) -> u32 {
        self.composite.as_ref().map_or(0, CompositeCandle::sub_count)
    }

    /// Bootstrap the rolling windows from `source`. Returns the number of
    /// historical bars replayed.
    pub async fn initiate(
        &mut self,
        source: &dyn HistoricalDataSource,
        now: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        if !self.settings.precalculate {
            tracing::info!(
                tracker = %self.name,
                epic = %self.epic,
                resolution = %self.resolution,
                "Pre-calculation disabled, starting with empty windows"
            );
            return Ok(0);
        }

        let start = now - self.resolution.duration() * self.settings.window as i32;
        tracing::info!(
            tracker = %self.name,
            epic = %self.epic,
            resolution = %self.resolution,
            start = %start,
            end = %now,
            "Initiating tracker"
        );
        let rows = source.fetch(&self.epic, self.resolution, start, now).await?;
        Ok(self.seed_from_history(&rows))
    }

    /// Rebuild both windows from `rows` by replaying them with notifications
    /// suppressed, so every row lands in each window exactly once, as it
    /// would during a live replay. Rows with an unparsable timestamp are
    /// skipped.
    pub fn seed_from_history(&mut self, rows: &[HistoricalRow]) -> usize {
        let bars: Vec<BarSnapshot> = rows
            .iter()
            .filter_map(|row| match row.to_snapshot() {
                Ok(bar) => Some(bar),
                Err(e) => {
                    tracing::warn!(tracker = %self.name, error = %e, "Skipping malformed historical row");
                    None
                }
            })
            .collect();

        self.volume_stats.seed(std::iter::empty());
        self.spread_stats.seed(std::iter::empty());
        for bar in &bars {
            self.process_candle(Candle::from_snapshot(bar), false);
        }
        log_window("volume", &self.name, self.volume_stats.snapshot());
        log_window("spread", &self.name, self.spread_stats.snapshot());
        bars.len()
    }

    /// Feed one raw bar. Returns the assessment when a candle completed.
    ///
    /// Parse failures leave the tracker untouched.
    pub fn add_candle(
        &mut self,
        values: &BarValues,
        notify: bool,
    ) -> Result<Option<CandleAssessment>, AppError> {
        let bar = BarSnapshot::from_values(values)?;
        self.add_bar(&bar, notify)
    }

    pub fn add_bar(
        &mut self,
        bar: &BarSnapshot,
        notify: bool,
    ) -> Result<Option<CandleAssessment>, AppError> {
        if !self.resolution.is_composite() {
            self.started = true;
            return Ok(Some(self.process_candle(Candle::from_snapshot(bar), notify)));
        }

        if !self.started {
            if bar.time.minute() % self.resolution.minutes() != 0 {
                tracing::debug!(
                    tracker = %self.name,
                    time = %bar.time,
                    "Dropping sub-bar before period boundary"
                );
                return Ok(None);
            }
            self.started = true;
            tracing::info!(tracker = %self.name, time = %bar.time, "Aligned to period boundary");
        }

        let mut composite = match self.composite.take() {
            Some(composite) => composite,
            None => CompositeCandle::new(self.resolution)?,
        };
        let candle = match composite.add_sub_bar(bar) {
            Ok(CompositeState::Building) => {
                self.composite = Some(composite);
                return Ok(None);
            }
            Ok(CompositeState::Complete) => composite.into_candle().ok_or_else(|| {
                AppError::InvalidState("complete composite candle without a candle".to_string())
            })?,
            Err(e) => {
                // the partial candle is lost either way
                if bar.time.minute() % self.resolution.minutes() == 0 {
                    let mut restarted = CompositeCandle::new(self.resolution)?;
                    restarted.add_sub_bar(bar)?;
                    self.composite = Some(restarted);
                    tracing::info!(tracker = %self.name, time = %bar.time, "Restarted at period boundary");
                } else {
                    self.started = false;
                }
                return Err(e);
            }
        };
        Ok(Some(self.process_candle(candle, notify)))
    }

    fn process_candle(&mut self, candle: Candle, notify: bool) -> CandleAssessment {
        let volume_stats = self.volume_stats.push(candle.volume());
        let spread_stats = self.spread_stats.push(candle.spread_size());
        let classification = classify(&candle, volume_stats, spread_stats);

        self.candles.push_back(candle.clone());
        while self.candles.len() > self.settings.window {
            let _ = self.candles.pop_front();
        }

        let assessment = CandleAssessment {
            candle,
            classification,
            volume_stats,
            spread_stats,
        };

        if assessment.is_anomaly() {
            tracing::info!(
                tracker = %self.name,
                epic = %self.epic,
                resolution = %self.resolution,
                shape = assessment.candle.shape_type().as_str(),
                volume = assessment.candle.volume(),
                "High volume reversal candle"
            );
            if notify {
                self.dispatch(&assessment);
            }
        }
        assessment
    }

    fn dispatch(&self, assessment: &CandleAssessment) {
        let summary = self.summary(assessment);
        let detail = AnomalyDetail {
            time: assessment.candle.time().format(SUMMARY_TIME_FORMAT).to_string(),
            name: &self.name,
            epic: &self.epic,
            resolution: self.resolution,
            assessment,
        };
        let detail = serde_json::to_string_pretty(&detail)
            .unwrap_or_else(|e| format!("failed to render anomaly detail: {}", e));

        for sink in &self.sinks {
            if let Err(e) = sink.notify(&summary, &detail) {
                tracing::error!(tracker = %self.name, error = %e, "Notification sink failed");
            }
        }
    }

    fn summary(&self, assessment: &CandleAssessment) -> String {
        let candle = &assessment.candle;
        format!(
            "{} {} on high volume ({:.0} > {:.2}) at {}",
            self.name,
            candle.shape_type().as_str(),
            candle.volume(),
            assessment.volume_stats.mean + VOLUME_BAND_K * assessment.volume_stats.std,
            candle.time().format(SUMMARY_TIME_FORMAT)
        )
    }
}

fn log_window(series: &str, name: &str, stats: WindowStats) {
    tracing::info!(
        tracker = name,
        series,
        mean = stats.mean,
        std = stats.std,
        threshold = stats.mean + stats.std,
        samples = stats.len,
        "Seeded rolling window"
    );
}
