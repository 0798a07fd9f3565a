pub mod replay;
pub mod types;
pub mod ws;

pub use replay::{ReplayFeed, ReplayStats};
pub use types::{BarUpdate, SubscriptionKey};
pub use ws::WsFeedClient;
