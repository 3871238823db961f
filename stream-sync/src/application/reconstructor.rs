//! Order Book Reconstructor
//!
//! Maintains one symbol's book from an out-of-band snapshot plus the
//! streamed deltas that follow it. Deltas that arrive before the snapshot
//! are buffered and replayed once it lands.

use std::cmp::Reverse;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use sync_core::{DepthDelta, DepthSnapshot, Price, PriceLevel, Quantity, TimestampMs};

use crate::domain::{ContinuityPredicate, SyncError, SyncStatus};

/// Result of feeding one delta to the reconstructor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// Delta continued the book and was applied
    Applied,
    /// No snapshot yet, delta queued for replay
    Buffered,
    /// Delta ends at or before the book's sequence, dropped
    Stale,
}

/// Live state of one symbol's book
#[derive(Debug, Default)]
pub struct OrderBookState {
    bids: BTreeMap<Reverse<Price>, Quantity>,
    asks: BTreeMap<Price, Quantity>,
    /// Last applied sequence, `None` until a snapshot anchors the book
    sequence: Option<u64>,
    timestamp: Option<TimestampMs>,
    /// Deltas received before the snapshot, in arrival order
    pending_deltas: VecDeque<DepthDelta>,
    /// No delta applied since the last snapshot
    awaiting_first: bool,
}

impl OrderBookState {
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn timestamp(&self) -> Option<TimestampMs> {
        self.timestamp
    }

    pub fn pending(&self) -> impl Iterator<Item = &DepthDelta> {
        self.pending_deltas.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending_deltas.len()
    }

    pub fn bid_levels(&self) -> usize {
        self.bids.len()
    }

    pub fn ask_levels(&self) -> usize {
        self.asks.len()
    }

    fn upsert_bid(&mut self, level: &PriceLevel) {
        if level.is_empty() {
            self.bids.remove(&Reverse(level.price));
        } else {
            self.bids.insert(Reverse(level.price), level.quantity);
        }
    }

    fn upsert_ask(&mut self, level: &PriceLevel) {
        if level.is_empty() {
            self.asks.remove(&level.price);
        } else {
            self.asks.insert(level.price, level.quantity);
        }
    }

    fn apply_levels(&mut self, delta: &DepthDelta) {
        for level in &delta.bids {
            self.upsert_bid(level);
        }
        for level in &delta.asks {
            self.upsert_ask(level);
        }
        self.sequence = Some(delta.end_seq);
        if delta.timestamp.is_some() {
            self.timestamp = delta.timestamp;
        }
        self.awaiting_first = false;
    }
}

/// Materialized view handed to consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBook {
    pub symbol: String,
    /// Best (highest) bid first
    pub bids: Vec<PriceLevel>,
    /// Best (lowest) ask first
    pub asks: Vec<PriceLevel>,
    pub sequence: Option<u64>,
    pub timestamp: Option<TimestampMs>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    pub fn spread(&self) -> Option<Price> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some(ask.price - bid.price)
    }

    pub fn mid_price(&self) -> Option<Price> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        Some(Price::new((bid.price.inner() + ask.price.inner()) / rust_decimal::Decimal::TWO))
    }

    /// Keep at most `depth` levels per side
    pub fn limit(mut self, depth: usize) -> Self {
        self.bids.truncate(depth);
        self.asks.truncate(depth);
        self
    }
}

/// Rebuilds one symbol's book. Continuity between deltas is decided by the
/// injected predicate so every venue shares this implementation.
#[derive(Debug)]
pub struct OrderBookReconstructor {
    symbol: String,
    state: OrderBookState,
    continuity: Arc<dyn ContinuityPredicate>,
    /// Depth of the materialized view; the retained state is never truncated
    depth_limit: Option<usize>,
    max_pending: usize,
    /// Distinguishes this book from earlier ones for the same symbol
    generation: u64,
}

impl OrderBookReconstructor {
    pub fn new(
        symbol: impl Into<String>,
        continuity: Arc<dyn ContinuityPredicate>,
        max_pending: usize,
    ) -> Self {
        OrderBookReconstructor {
            symbol: symbol.into().to_uppercase(),
            state: OrderBookState::default(),
            continuity,
            depth_limit: None,
            max_pending,
            generation: 0,
        }
    }

    pub fn with_depth_limit(mut self, depth: usize) -> Self {
        self.depth_limit = Some(depth);
        self
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn state(&self) -> &OrderBookState {
        &self.state
    }

    pub fn status(&self) -> SyncStatus {
        if self.state.sequence.is_some() {
            SyncStatus::Synced
        } else {
            SyncStatus::Syncing
        }
    }

    /// Replace the book wholesale and replay buffered deltas.
    /// Returns the number of buffered deltas applied.
    pub fn apply_snapshot(&mut self, snapshot: DepthSnapshot) -> Result<usize, SyncError> {
        self.state.bids.clear();
        self.state.asks.clear();
        for level in &snapshot.bids {
            self.state.upsert_bid(level);
        }
        for level in &snapshot.asks {
            self.state.upsert_ask(level);
        }
        self.state.sequence = Some(snapshot.sequence);
        self.state.timestamp = snapshot.timestamp;
        self.state.awaiting_first = true;

        let buffered = std::mem::take(&mut self.state.pending_deltas);
        let mut replayed = 0;
        for delta in buffered {
            if self.accept(delta)? == DeltaOutcome::Applied {
                replayed += 1;
            }
        }

        tracing::debug!(
            "{} snapshot at {} applied, {} buffered deltas replayed",
            self.symbol,
            snapshot.sequence,
            replayed
        );
        Ok(replayed)
    }

    /// Feed one streamed delta.
    ///
    /// `SequenceGap` and `BufferOverflow` mean the book can no longer be
    /// trusted; the caller must discard it and resubscribe.
    pub fn apply_delta(&mut self, delta: DepthDelta) -> Result<DeltaOutcome, SyncError> {
        if self.state.sequence.is_none() {
            if self.state.pending_deltas.len() >= self.max_pending {
                return Err(SyncError::BufferOverflow {
                    symbol: self.symbol.clone(),
                    limit: self.max_pending,
                });
            }
            self.state.pending_deltas.push_back(delta);
            return Ok(DeltaOutcome::Buffered);
        }
        self.accept(delta)
    }

    fn accept(&mut self, delta: DepthDelta) -> Result<DeltaOutcome, SyncError> {
        match self.check(&delta) {
            Ok(()) => {
                self.state.apply_levels(&delta);
                Ok(DeltaOutcome::Applied)
            }
            Err(SyncError::StaleDelta {
                sequence, end_seq, ..
            }) => {
                tracing::trace!(
                    "{} dropping stale delta ending at {} (book at {})",
                    self.symbol,
                    end_seq,
                    sequence
                );
                Ok(DeltaOutcome::Stale)
            }
            Err(e) => Err(e),
        }
    }

    fn check(&self, delta: &DepthDelta) -> Result<(), SyncError> {
        let sequence = self.state.sequence.unwrap_or_default();
        if delta.end_seq <= sequence {
            return Err(SyncError::StaleDelta {
                symbol: self.symbol.clone(),
                sequence,
                end_seq: delta.end_seq,
            });
        }
        if !self
            .continuity
            .holds(sequence, delta, self.state.awaiting_first)
        {
            return Err(SyncError::SequenceGap {
                symbol: self.symbol.clone(),
                sequence,
                start_seq: delta.start_seq,
                end_seq: delta.end_seq,
            });
        }
        Ok(())
    }

    /// Current book, truncated to the configured depth
    pub fn view(&self) -> OrderBook {
        let depth = self.depth_limit.unwrap_or(usize::MAX);
        OrderBook {
            symbol: self.symbol.clone(),
            bids: self
                .state
                .bids
                .iter()
                .take(depth)
                .map(|(Reverse(price), quantity)| PriceLevel::new(*price, *quantity))
                .collect(),
            asks: self
                .state
                .asks
                .iter()
                .take(depth)
                .map(|(price, quantity)| PriceLevel::new(*price, *quantity))
                .collect(),
            sequence: self.state.sequence,
            timestamp: self.state.timestamp,
        }
    }
}
