pub mod sliding_stats;

pub use sliding_stats::{SlidingStats, WindowStats};
