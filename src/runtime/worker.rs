use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::AppError;
use crate::feed::types::BarUpdate;
use crate::tracker::VolumeTracker;

/// Counters a worker reports when its channel closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub received: usize,
    pub incomplete: usize,
    pub candles: usize,
    pub anomalies: usize,
    pub rejected: usize,
}

/// Own `tracker` on a dedicated task and feed it every completed bar from
/// `update_rx`. The tracker is handed back when the channel closes.
pub fn spawn_tracker_worker(
    mut tracker: VolumeTracker,
    mut update_rx: mpsc::Receiver<BarUpdate>,
    notify: bool,
) -> JoinHandle<(VolumeTracker, WorkerStats)> {
    tokio::spawn(async move {
        let mut stats = WorkerStats::default();
        while let Some(update) = update_rx.recv().await {
            stats.received += 1;
            if !update.is_complete() {
                stats.incomplete += 1;
                continue;
            }
            match tracker.add_candle(&update.values, notify) {
                Ok(Some(assessment)) => {
                    stats.candles += 1;
                    if assessment.is_anomaly() {
                        stats.anomalies += 1;
                    }
                }
                Ok(None) => {}
                Err(e @ AppError::Parse { .. }) => {
                    stats.rejected += 1;
                    tracing::warn!(tracker = %tracker.name(), item = %update.name, error = %e, "Rejected malformed bar");
                }
                Err(e) => {
                    stats.rejected += 1;
                    tracing::error!(tracker = %tracker.name(), item = %update.name, error = %e, "Bar rejected, waiting for next period");
                }
            }
        }
        tracing::info!(
            tracker = %tracker.name(),
            received = stats.received,
            candles = stats.candles,
            anomalies = stats.anomalies,
            rejected = stats.rejected,
            "Tracker worker stopped"
        );
        (tracker, stats)
    })
}
