pub mod classification;
pub mod volume_tracker;

pub use classification::{classify, Classification, SpreadClass, VolumeClass};
pub use volume_tracker::{CandleAssessment, TrackerSettings, VolumeTracker, DEFAULT_WINDOW};
