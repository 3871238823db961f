use crate::records::Fee;
use crate::value_objects::{Price, Quantity, Side, TimestampMs};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical public or private trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub symbol: String,
    /// Owning order, set only for the account's own executions
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub side: Option<Side>,
    pub price: Price,
    pub amount: Quantity,
    pub timestamp: TimestampMs,
    #[serde(default)]
    pub fee: Option<Fee>,
    #[serde(default)]
    pub is_maker: Option<bool>,
}

impl Trade {
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        price: Price,
        amount: Quantity,
        timestamp: TimestampMs,
    ) -> Self {
        Trade {
            id: id.into(),
            symbol: symbol.into(),
            order_id: None,
            side: None,
            price,
            amount,
            timestamp,
            fee: None,
            is_maker: None,
        }
    }

    pub fn with_side(mut self, side: Side) -> Self {
        self.side = Some(side);
        self
    }

    pub fn with_order(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_fee(mut self, fee: Fee) -> Self {
        self.fee = Some(fee);
        self
    }

    /// Venue timestamp as UTC datetime
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}
