//! Delta continuity rules
//!
//! Venues disagree on how consecutive book deltas prove they follow each
//! other. The reconstructor is parameterized by a [`ContinuityPredicate`];
//! [`ContinuityMode`] covers the three schemes seen in practice.
//!
//! Every predicate is only consulted for deltas that are not stale, i.e.
//! `end_seq > sequence`. Stale deltas are dropped before continuity is checked.

use serde::{Deserialize, Serialize};
use std::fmt;
use sync_core::DepthDelta;

/// Decides whether `delta` continues a book whose last applied sequence is `sequence`
pub trait ContinuityPredicate: Send + Sync + fmt::Debug {
    /// `first` is true for the first delta applied after a snapshot
    fn holds(&self, sequence: u64, delta: &DepthDelta, first: bool) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuityMode {
    /// `start == sequence + 1`. The first delta after a snapshot only has to
    /// cover `sequence + 1`, since the snapshot usually lands mid-delta.
    #[default]
    Gapless,
    /// `start <= sequence + 1 <= end`, for venues whose deltas overlap
    OverlapTolerant,
    /// `prev_end == sequence`. The first delta after a snapshot may instead
    /// straddle the snapshot (`start <= sequence < end`).
    PreviousIdChained,
}

fn bridges(sequence: u64, delta: &DepthDelta) -> bool {
    let next = sequence.saturating_add(1);
    delta.start_seq <= next && next <= delta.end_seq
}

impl ContinuityPredicate for ContinuityMode {
    fn holds(&self, sequence: u64, delta: &DepthDelta, first: bool) -> bool {
        match self {
            ContinuityMode::Gapless => {
                if first {
                    bridges(sequence, delta)
                } else {
                    delta.start_seq == sequence.saturating_add(1)
                }
            }
            ContinuityMode::OverlapTolerant => bridges(sequence, delta),
            ContinuityMode::PreviousIdChained => {
                let chained = delta.prev_end_seq == Some(sequence);
                chained || (first && delta.start_seq <= sequence && sequence < delta.end_seq)
            }
        }
    }
}

impl fmt::Display for ContinuityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContinuityMode::Gapless => write!(f, "gapless"),
            ContinuityMode::OverlapTolerant => write!(f, "overlap_tolerant"),
            ContinuityMode::PreviousIdChained => write!(f, "previous_id_chained"),
        }
    }
}
