/// Sync status of one symbol's order book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// No book exists for the symbol
    Uninitialized,
    /// Waiting for snapshot (buffering deltas)
    Syncing,
    /// Anchored to a snapshot, applying deltas normally
    Synced,
    /// Discarded after a gap; consumers must resubscribe
    OutOfSync,
}

impl SyncStatus {
    /// Whether the book may be read by consumers
    pub fn is_ready(&self) -> bool {
        matches!(self, SyncStatus::Synced)
    }

    /// Whether incoming deltas go to the pending buffer
    pub fn is_buffering(&self) -> bool {
        matches!(self, SyncStatus::Syncing)
    }
}
