use crate::value_objects::{PositionSide, Price, Quantity, TimestampMs};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Canonical position record, one per (symbol, side)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    /// Absolute position size; direction is carried by `side`
    pub contracts: Quantity,
    #[serde(default)]
    pub entry_price: Option<Price>,
    #[serde(default)]
    pub unrealized_pnl: Option<Decimal>,
    pub timestamp: TimestampMs,
}

impl Position {
    pub fn new(
        symbol: impl Into<String>,
        side: PositionSide,
        contracts: Quantity,
        timestamp: TimestampMs,
    ) -> Self {
        Position {
            symbol: symbol.into(),
            side,
            contracts,
            entry_price: None,
            unrealized_pnl: None,
            timestamp,
        }
    }

    pub fn with_entry_price(mut self, price: Price) -> Self {
        self.entry_price = Some(price);
        self
    }

    pub fn is_flat(&self) -> bool {
        self.contracts.is_zero()
    }
}
