use std::collections::{BTreeSet, HashMap};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::feed::types::BarUpdate;

fn normalize_key(key: &str) -> &str {
    key.trim()
}

/// Per-update delivery counts from [`TrackerRegistry::dispatch`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub delivered: usize,
    /// Trackers whose queue was full or whose worker had stopped.
    pub dropped: usize,
}

/// Totals reported by [`route_updates`] once the feed closes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterStats {
    /// Updates delivered to at least one tracker.
    pub routed: usize,
    /// Tracker deliveries dropped on a full or closed queue.
    pub dropped: usize,
}

/// Routes feed updates to tracker workers by subscription key. Several
/// trackers may share one key (e.g. 15MINUTE and HOUR trackers of the same
/// epic both consume the 5MINUTE feed).
#[derive(Default)]
pub struct TrackerRegistry {
    trackers: HashMap<String, TrackerHandle>,
    trackers_by_key: HashMap<String, BTreeSet<String>>,
}

struct TrackerHandle {
    key: String,
    update_tx: mpsc::Sender<BarUpdate>,
    dropped: u64,
}

impl TrackerRegistry {
    pub fn register(
        &mut self,
        tracker_id: impl Into<String>,
        key: impl Into<String>,
        update_tx: mpsc::Sender<BarUpdate>,
    ) {
        let tracker_id = tracker_id.into();
        let key: String = key.into();
        let key = normalize_key(&key).to_string();

        self.unregister(&tracker_id);
        self.trackers.insert(
            tracker_id.clone(),
            TrackerHandle {
                key: key.clone(),
                update_tx,
                dropped: 0,
            },
        );
        self.trackers_by_key
            .entry(key)
            .or_default()
            .insert(tracker_id);
    }

    pub fn unregister(&mut self, tracker_id: &str) {
        let Some(existing) = self.trackers.remove(tracker_id) else {
            return;
        };
        if let Some(ids) = self.trackers_by_key.get_mut(&existing.key) {
            ids.remove(tracker_id);
            if ids.is_empty() {
                self.trackers_by_key.remove(&existing.key);
            }
        }
    }

    /// Deliver `update` to every tracker registered for its key without
    /// waiting. A tracker whose queue is full misses the update and its drop
    /// counter grows; the other trackers still receive it.
    pub fn dispatch(&mut self, update: BarUpdate) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let key = normalize_key(&update.name);
        let Some(tracker_ids) = self.trackers_by_key.get(key) else {
            tracing::trace!(item = %update.name, "No tracker for feed item");
            return outcome;
        };

        for tracker_id in tracker_ids {
            let Some(tracker) = self.trackers.get_mut(tracker_id) else {
                continue;
            };
            match tracker.update_tx.try_send(update.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracker.dropped += 1;
                    outcome.dropped += 1;
                    tracing::warn!(
                        tracker = %tracker_id,
                        item = key,
                        dropped = tracker.dropped,
                        "Tracker queue full, update dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    tracker.dropped += 1;
                    outcome.dropped += 1;
                    tracing::warn!(tracker = %tracker_id, "Tracker worker stopped, update not delivered");
                }
            }
        }
        outcome
    }

    /// Updates dropped for `tracker_id` since it was registered.
    pub fn dropped(&self, tracker_id: &str) -> u64 {
        self.trackers.get(tracker_id).map_or(0, |t| t.dropped)
    }

    /// Return tracker ids for the key in deterministic lexical order.
    pub fn tracker_ids_for_key(&self, key: &str) -> Vec<String> {
        self.trackers_by_key
            .get(normalize_key(key))
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Subscription keys with at least one tracker, in lexical order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.trackers_by_key.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

/// Forward updates from the feed channel to the registry until the feed
/// closes.
pub async fn route_updates(
    mut registry: TrackerRegistry,
    mut feed_rx: mpsc::Receiver<BarUpdate>,
) -> RouterStats {
    let mut stats = RouterStats::default();
    while let Some(update) = feed_rx.recv().await {
        let outcome = registry.dispatch(update);
        if outcome.delivered > 0 {
            stats.routed += 1;
        }
        stats.dropped += outcome.dropped;
    }
    tracing::info!(routed = stats.routed, dropped = stats.dropped, "Feed closed, router stopped");
    stats
}
