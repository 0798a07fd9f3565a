pub mod bar;
pub mod candle;
pub mod composite;
pub mod resolution;

pub use bar::{BarSnapshot, BarValues};
pub use candle::{Candle, CandleShape, ShapeType, SpreadType};
pub use composite::{CompositeCandle, CompositeState};
pub use resolution::Resolution;
