use crate::value_objects::{Price, Quantity, TimestampMs};
use serde::{Deserialize, Serialize};

/// Rolling 24h statistics for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    #[serde(default)]
    pub last: Option<Price>,
    #[serde(default)]
    pub bid: Option<Price>,
    #[serde(default)]
    pub ask: Option<Price>,
    #[serde(default)]
    pub high: Option<Price>,
    #[serde(default)]
    pub low: Option<Price>,
    #[serde(default)]
    pub base_volume: Option<Quantity>,
    pub timestamp: TimestampMs,
}

impl Ticker {
    pub fn new(symbol: impl Into<String>, timestamp: TimestampMs) -> Self {
        Ticker {
            symbol: symbol.into(),
            last: None,
            bid: None,
            ask: None,
            high: None,
            low: None,
            base_volume: None,
            timestamp,
        }
    }
}
