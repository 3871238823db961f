use crate::entities::PriceLevel;
use crate::value_objects::TimestampMs;
use serde::{Deserialize, Serialize};

/// Complete point-in-time book, fetched out of band to anchor the delta stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    /// Reference sequence (nonce) the snapshot reflects
    pub sequence: u64,
    #[serde(default)]
    pub timestamp: Option<TimestampMs>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl DepthSnapshot {
    pub fn new(sequence: u64, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> Self {
        DepthSnapshot {
            sequence,
            timestamp: None,
            bids,
            asks,
        }
    }

    pub fn with_timestamp(mut self, timestamp: TimestampMs) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Incremental book update covering the sequence range `start_seq..=end_seq`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthDelta {
    pub symbol: String,
    pub start_seq: u64,
    pub end_seq: u64,
    /// End sequence of the previous delta, for venues that chain deltas explicitly
    #[serde(default)]
    pub prev_end_seq: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<TimestampMs>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl DepthDelta {
    pub fn new(symbol: impl Into<String>, start_seq: u64, end_seq: u64) -> Self {
        DepthDelta {
            symbol: symbol.into(),
            start_seq,
            end_seq,
            prev_end_seq: None,
            timestamp: None,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }

    pub fn with_bids(mut self, bids: Vec<PriceLevel>) -> Self {
        self.bids = bids;
        self
    }

    pub fn with_asks(mut self, asks: Vec<PriceLevel>) -> Self {
        self.asks = asks;
        self
    }

    pub fn with_prev_end(mut self, prev_end_seq: u64) -> Self {
        self.prev_end_seq = Some(prev_end_seq);
        self
    }

    pub fn with_timestamp(mut self, timestamp: TimestampMs) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}
