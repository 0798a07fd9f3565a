use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::MarketConfig;
use crate::feed::SubscriptionKey;
use crate::history::HistoricalDataSource;
use crate::notify::NotificationSink;
use crate::runtime::{spawn_tracker_worker, TrackerRegistry, WorkerStats};
use crate::tracker::{TrackerSettings, VolumeTracker};

/// A market whose tracker could not be bootstrapped.
#[derive(Debug)]
pub struct BootstrapFailure {
    pub market: String,
    pub error: String,
}

/// Build and bootstrap one tracker per market. A failing market is logged,
/// reported in the second vector and left out; the others still start.
pub async fn bootstrap_trackers(
    markets: &[MarketConfig],
    settings: TrackerSettings,
    source: &dyn HistoricalDataSource,
    sinks: &[Arc<dyn NotificationSink>],
    now: DateTime<Utc>,
) -> (Vec<VolumeTracker>, Vec<BootstrapFailure>) {
    let mut trackers = Vec::with_capacity(markets.len());
    let mut failures = Vec::new();

    for market in markets {
        let mut tracker =
            match VolumeTracker::new(&market.name, &market.epic, market.resolution, settings) {
                Ok(tracker) => tracker,
                Err(e) => {
                    tracing::error!(market = %market.name, error = %e, "Failed to create tracker");
                    failures.push(BootstrapFailure {
                        market: market.name.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
        for sink in sinks {
            tracker.add_sink(Arc::clone(sink));
        }

        match tracker.initiate(source, now).await {
            Ok(replayed) => {
                tracing::info!(
                    market = %market.name,
                    epic = %market.epic,
                    resolution = %market.resolution,
                    replayed,
                    "Tracker bootstrapped"
                );
                trackers.push(tracker);
            }
            Err(e) => {
                tracing::error!(market = %market.name, error = %e, "Tracker bootstrap failed, market skipped");
                failures.push(BootstrapFailure {
                    market: market.name.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    (trackers, failures)
}

/// Spawn one worker per tracker and register it under the feed item it
/// consumes.
pub fn start_workers(
    trackers: Vec<VolumeTracker>,
    channel_capacity: usize,
    notify: bool,
) -> (TrackerRegistry, Vec<JoinHandle<(VolumeTracker, WorkerStats)>>) {
    let mut registry = TrackerRegistry::default();
    let mut handles = Vec::with_capacity(trackers.len());

    for tracker in trackers {
        let key = SubscriptionKey::for_tracker(tracker.epic(), tracker.resolution());
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        registry.register(tracker.name().to_string(), key.to_string(), tx);
        handles.push(spawn_tracker_worker(tracker, rx, notify));
    }

    (registry, handles)
}
