use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use vpa_anomaly_detector::error::AppError;
use vpa_anomaly_detector::history::{format_row_time, HistoricalDataSource, HistoricalRow};
use vpa_anomaly_detector::indicator::sliding_stats::WindowStats;
use vpa_anomaly_detector::model::bar::BarSnapshot;
use vpa_anomaly_detector::model::candle::{Candle, ShapeType};
use vpa_anomaly_detector::model::resolution::Resolution;
use vpa_anomaly_detector::notify::NotificationSink;
use vpa_anomaly_detector::tracker::{classify, TrackerSettings, VolumeClass, VolumeTracker};

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap()
}

fn average_bar(minute: u32, volume: f64) -> BarSnapshot {
    BarSnapshot {
        high: 10.0,
        low: 0.0,
        open: 2.0,
        close: 8.0,
        volume,
        time: at(10, minute),
    }
}

fn hammer_bar(minute: u32, volume: f64) -> BarSnapshot {
    BarSnapshot {
        high: 10.0,
        low: 0.0,
        open: 9.5,
        close: 10.0,
        volume,
        time: at(10, minute),
    }
}

fn live_settings() -> TrackerSettings {
    TrackerSettings {
        window: 96,
        precalculate: false,
    }
}

#[derive(Default)]
struct RecordingSink {
    seen: Mutex<Vec<(String, String)>>,
}

impl NotificationSink for RecordingSink {
    fn notify(&self, summary: &str, detail: &str) -> Result<(), AppError> {
        self.seen
            .lock()
            .map_err(|_| AppError::Notification("poisoned".to_string()))?
            .push((summary.to_string(), detail.to_string()));
        Ok(())
    }
}

struct FailingSink;

impl NotificationSink for FailingSink {
    fn notify(&self, _summary: &str, _detail: &str) -> Result<(), AppError> {
        Err(AppError::Notification("smtp down".to_string()))
    }
}

struct StaticHistory {
    rows: Vec<HistoricalRow>,
}

#[async_trait]
impl HistoricalDataSource for StaticHistory {
    async fn fetch(
        &self,
        _epic: &str,
        _resolution: Resolution,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalRow>, AppError> {
        Ok(self.rows.clone())
    }
}

fn history_rows(count: usize) -> Vec<HistoricalRow> {
    (0..count)
        .map(|i| {
            let open = 100.0 + (i % 4) as f64;
            let close = open + ((i * 3) % 5) as f64 - 2.0;
            HistoricalRow {
                timestamp: format_row_time(at(0, 0) + chrono::Duration::minutes(5 * i as i64)),
                open,
                close,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                volume: 10.0 + ((i * 7) % 9) as f64,
            }
        })
        .collect()
}

#[test]
/// Anomaly needs both a reversal shape and volume above mean + std.
fn anomaly_requires_high_volume_reversal() {
    let volume_stats = WindowStats::new(10.0, 2.0);
    let spread_stats = WindowStats::new(1.0, 0.5);

    let hammer = Candle::from_snapshot(&hammer_bar(0, 13.0));
    assert_eq!(hammer.shape_type(), ShapeType::StrongHammer);
    let c = classify(&hammer, volume_stats, spread_stats);
    assert_eq!(c.volume_class, VolumeClass::HighVolume);
    assert!(c.is_anomaly);

    let average = Candle::from_snapshot(&average_bar(0, 13.0));
    assert_eq!(average.shape_type(), ShapeType::AverageShape);
    let c = classify(&average, volume_stats, spread_stats);
    assert_eq!(c.volume_class, VolumeClass::HighVolume);
    assert!(!c.is_anomaly);

    let quiet = Candle::from_snapshot(&hammer_bar(0, 12.0));
    assert!(!classify(&quiet, volume_stats, spread_stats).is_anomaly);
}

#[test]
/// A 15-minute tracker fed bars at 3, 8, 13, 15, 20, 25 ignores everything
/// before 15 and completes one candle at 25.
fn alignment_gate_waits_for_period_boundary() {
    let mut vt = VolumeTracker::new(
        "Gold 15M",
        "CS.D.CFDGOLD.CFDGC.IP",
        Resolution::FifteenMinute,
        live_settings(),
    )
    .unwrap();

    for minute in [3, 8, 13] {
        assert!(vt.add_bar(&average_bar(minute, 5.0), false).unwrap().is_none());
        assert!(!vt.is_started());
        assert_eq!(vt.pending_sub_bars(), 0);
    }

    assert!(vt.add_bar(&average_bar(15, 5.0), false).unwrap().is_none());
    assert!(vt.is_started());
    assert_eq!(vt.pending_sub_bars(), 1);
    assert!(vt.add_bar(&average_bar(20, 5.0), false).unwrap().is_none());
    assert_eq!(vt.pending_sub_bars(), 2);

    let assessment = vt.add_bar(&average_bar(25, 5.0), false).unwrap().unwrap();
    assert_eq!(assessment.candle.time(), at(10, 15));
    assert!((assessment.candle.volume() - 15.0).abs() < f64::EPSILON);
    assert_eq!(vt.candle_count(), 1);
    assert_eq!(vt.pending_sub_bars(), 0);
    assert_eq!(vt.volume_stats().len, 1);
}

#[test]
fn composite_tracker_keeps_aggregating_across_periods() {
    let mut vt = VolumeTracker::new("Gold 15M", "GOLD", Resolution::FifteenMinute, live_settings())
        .unwrap();
    let mut completed = 0;
    for minute in (0..60).step_by(5) {
        if vt.add_bar(&average_bar(minute, 1.0), false).unwrap().is_some() {
            completed += 1;
        }
    }
    assert_eq!(completed, 4);
    assert_eq!(vt.candle_count(), 4);
    let times: Vec<_> = vt.candles().map(Candle::time).collect();
    assert_eq!(times, vec![at(10, 0), at(10, 15), at(10, 30), at(10, 45)]);
}

#[test]
fn parse_failure_leaves_tracker_untouched() {
    let mut vt = VolumeTracker::new("Gold 15M", "GOLD", Resolution::FifteenMinute, live_settings())
        .unwrap();
    vt.add_bar(&average_bar(0, 3.0), false).unwrap();
    vt.add_bar(&average_bar(5, 3.0), false).unwrap();
    let volume_before = vt.volume_stats();
    let spread_before = vt.spread_stats();

    let mut values = average_bar(10, 3.0).to_values();
    values.insert("BID_CLOSE".to_string(), "NaN".to_string());
    let err = vt.add_candle(&values, true).unwrap_err();
    assert!(err.is_parse());

    assert!(vt.is_started());
    assert_eq!(vt.pending_sub_bars(), 2);
    assert_eq!(vt.candle_count(), 0);
    assert_eq!(vt.volume_stats(), volume_before);
    assert_eq!(vt.spread_stats(), spread_before);

    let assessment = vt.add_candle(&average_bar(10, 3.0).to_values(), false).unwrap();
    assert!(assessment.is_some());
}

#[test]
/// A failing sink is logged and skipped; the sinks after it still fire.
fn failing_sink_does_not_block_others() {
    let recorder = Arc::new(RecordingSink::default());
    let mut vt = VolumeTracker::new("Gold 5M", "GOLD", Resolution::FiveMinute, live_settings())
        .unwrap();
    vt.add_sink(Arc::new(FailingSink));
    vt.add_sink(recorder.clone());

    for i in 0..9 {
        let out = vt.add_bar(&average_bar(i * 5, 10.0), true).unwrap().unwrap();
        assert!(!out.is_anomaly());
    }
    let assessment = vt.add_bar(&hammer_bar(45, 100.0), true).unwrap().unwrap();
    assert!(assessment.is_anomaly());
    assert!((assessment.volume_stats.mean - 19.0).abs() < 1e-9);
    assert!((assessment.volume_stats.std - 27.0).abs() < 1e-9);

    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        seen[0].0,
        "Gold 5M STRONG_HAMMER on high volume (100 > 46.00) at 2024-03-04 10:45:00"
    );
    let detail: serde_json::Value = serde_json::from_str(&seen[0].1).unwrap();
    assert_eq!(detail["epic"], "GOLD");
    assert_eq!(detail["resolution"], "5MINUTE");
    assert_eq!(detail["volume_class"], "HIGH_VOLUME");
    assert_eq!(detail["is_anomaly"], true);
}

#[test]
fn notify_flag_off_suppresses_sinks() {
    let recorder = Arc::new(RecordingSink::default());
    let mut vt = VolumeTracker::new("Gold 5M", "GOLD", Resolution::FiveMinute, live_settings())
        .unwrap();
    vt.add_sink(recorder.clone());
    for i in 0..9 {
        vt.add_bar(&average_bar(i * 5, 10.0), false).unwrap();
    }
    let assessment = vt.add_bar(&hammer_bar(45, 100.0), false).unwrap().unwrap();
    assert!(assessment.is_anomaly());
    assert!(recorder.seen.lock().unwrap().is_empty());
}

#[tokio::test]
/// Two fresh trackers bootstrapped from the same history agree on window
/// stats and on the verdict for the next live bar.
async fn bootstrap_is_idempotent() {
    let source = StaticHistory {
        rows: history_rows(40),
    };
    let settings = TrackerSettings {
        window: 24,
        precalculate: true,
    };

    let mut first = VolumeTracker::new("Gold 5M", "GOLD", Resolution::FiveMinute, settings).unwrap();
    let mut second = VolumeTracker::new("Gold 5M", "GOLD", Resolution::FiveMinute, settings).unwrap();
    assert_eq!(first.initiate(&source, at(12, 0)).await.unwrap(), 40);
    assert_eq!(second.initiate(&source, at(12, 0)).await.unwrap(), 40);

    assert_eq!(first.volume_stats(), second.volume_stats());
    assert_eq!(first.spread_stats(), second.spread_stats());
    assert_eq!(first.volume_stats().len, 24);
    assert_eq!(first.candle_count(), 24);

    let live = hammer_bar(5, 60.0);
    let a = first.add_bar(&live, false).unwrap().unwrap();
    let b = second.add_bar(&live, false).unwrap().unwrap();
    assert_eq!(a, b);
    assert!(a.is_anomaly());
}

#[tokio::test]
async fn bootstrap_does_not_notify() {
    let recorder = Arc::new(RecordingSink::default());
    let mut rows = history_rows(10);
    rows.push(HistoricalRow {
        timestamp: "2024:03:04-00:50:00".to_string(),
        open: 100.0,
        close: 100.5,
        high: 100.5,
        low: 90.0,
        volume: 500.0,
    });
    let source = StaticHistory { rows };
    let mut vt = VolumeTracker::new("Gold 5M", "GOLD", Resolution::FiveMinute, TrackerSettings::default())
        .unwrap();
    vt.add_sink(recorder.clone());

    assert_eq!(vt.initiate(&source, at(1, 0)).await.unwrap(), 11);
    assert!(vt.last_candle().unwrap().shape_type().is_reversal());
    assert!(recorder.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn precalculate_off_skips_history() {
    let source = StaticHistory {
        rows: history_rows(10),
    };
    let mut vt = VolumeTracker::new("Gold 5M", "GOLD", Resolution::FiveMinute, live_settings())
        .unwrap();
    assert_eq!(vt.initiate(&source, at(1, 0)).await.unwrap(), 0);
    assert_eq!(vt.volume_stats().len, 0);
    assert_eq!(vt.candle_count(), 0);
}

#[test]
fn malformed_history_rows_are_skipped() {
    let mut rows = history_rows(5);
    rows[2].timestamp = "yesterday".to_string();
    let mut vt = VolumeTracker::new("Gold 5M", "GOLD", Resolution::FiveMinute, live_settings())
        .unwrap();
    assert_eq!(vt.seed_from_history(&rows), 4);
    assert_eq!(vt.candle_count(), 4);
    assert_eq!(vt.volume_stats().len, 4);
    assert_eq!(vt.spread_stats().len, 4);
}

#[tokio::test]
/// Short history lands in each window once per row, never twice.
async fn short_history_fills_windows_once_per_row() {
    let rows = history_rows(10);
    let source = StaticHistory { rows: rows.clone() };
    let settings = TrackerSettings {
        window: 96,
        precalculate: true,
    };
    let mut vt = VolumeTracker::new("Gold 5M", "GOLD", Resolution::FiveMinute, settings).unwrap();

    assert_eq!(vt.initiate(&source, at(12, 0)).await.unwrap(), 10);
    assert_eq!(vt.volume_stats().len, 10);
    assert_eq!(vt.spread_stats().len, 10);
    assert_eq!(vt.candle_count(), 10);

    let mean = rows.iter().map(|r| r.volume).sum::<f64>() / rows.len() as f64;
    assert!((vt.volume_stats().mean - mean).abs() < 1e-9);

    let mut live = VolumeTracker::new("Gold 5M", "GOLD", Resolution::FiveMinute, live_settings())
        .unwrap();
    for row in &rows {
        live.add_bar(&row.to_snapshot().unwrap(), false).unwrap();
    }
    assert_eq!(vt.volume_stats(), live.volume_stats());
    assert_eq!(vt.spread_stats(), live.spread_stats());
}
