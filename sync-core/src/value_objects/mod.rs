mod price;
mod quantity;
mod side;

pub use price::Price;
pub use quantity::Quantity;
pub use side::{PositionSide, Side};

/// Milliseconds since the Unix epoch, as reported by the venue
pub type TimestampMs = i64;
