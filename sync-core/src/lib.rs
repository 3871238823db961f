//! Shared record types for the stream synchronization engine.
//!
//! Everything in this crate is venue-agnostic: a venue adapter's normalizer
//! turns raw wire payloads into these canonical records before they reach
//! any cache or order book.

pub mod entities;
pub mod error;
pub mod events;
pub mod records;
pub mod value_objects;

// Re-export value objects at crate root for convenience
pub use value_objects::{PositionSide, Price, Quantity, Side, TimestampMs};

// Re-export entities at crate root
pub use entities::PriceLevel;

// Re-export events at crate root
pub use events::{DepthDelta, DepthSnapshot};

// Re-export records at crate root
pub use records::{Balance, BalanceUpdate, Fee, Order, OrderStatus, Position, Ticker, Trade};

pub use error::CoreError;
