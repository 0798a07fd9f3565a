pub mod tracker_registry;
pub mod worker;

pub use tracker_registry::{route_updates, DispatchOutcome, RouterStats, TrackerRegistry};
pub use worker::{spawn_tracker_worker, WorkerStats};
