use std::time::Duration;

use crate::domain::{ContinuityMode, VenueId};

/// Configuration for the session manager
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lifetime of an issued token
    pub ttl: Duration,
    /// Renew once remaining lifetime drops below this
    pub safety_margin: Duration,
    /// Upper bound on one issue/extend call
    pub renewal_timeout: Duration,
    /// Delay before the renewal timer retries after a failure
    pub retry_interval: Duration,
}

impl SessionConfig {
    pub fn new(ttl: Duration, safety_margin: Duration) -> Self {
        SessionConfig {
            ttl,
            safety_margin,
            ..Self::default()
        }
    }

    pub fn with_renewal_timeout(mut self, timeout: Duration) -> Self {
        self.renewal_timeout = timeout;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Delay between issuing a token and renewing it
    pub fn renew_after(&self) -> Duration {
        self.ttl.saturating_sub(self.safety_margin)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            ttl: Duration::from_secs(60 * 60),
            safety_margin: Duration::from_secs(10 * 60),
            renewal_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_secs(5),
        }
    }
}

/// Configuration for the synchronization engine
/// Application-level configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Venue this engine is connected to
    pub venue: VenueId,
    /// Delta continuity scheme of the venue's book streams
    pub continuity: ContinuityMode,
    /// Public trades kept per symbol
    pub trades_limit: usize,
    /// Orders kept across all symbols
    pub orders_limit: usize,
    /// Own trades kept across all symbols
    pub my_trades_limit: usize,
    /// Positions kept, one per (symbol, side)
    pub positions_limit: usize,
    /// Depth requested for snapshots and the default view depth
    pub order_book_depth: u32,
    /// Maximum deltas to buffer while waiting for a snapshot
    pub max_pending_deltas: usize,
    pub snapshot_timeout: Duration,
    /// Silence after which an open connection is considered degraded
    pub heartbeat_interval: Duration,
}

impl EngineConfig {
    pub fn new(venue: impl Into<VenueId>) -> Self {
        EngineConfig {
            venue: venue.into(),
            continuity: ContinuityMode::Gapless,
            trades_limit: 1000,
            orders_limit: 1000,
            my_trades_limit: 1000,
            positions_limit: usize::MAX,
            order_book_depth: 1000,
            max_pending_deltas: 1000,
            snapshot_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    pub fn with_continuity(mut self, continuity: ContinuityMode) -> Self {
        self.continuity = continuity;
        self
    }

    pub fn with_trades_limit(mut self, limit: usize) -> Self {
        self.trades_limit = limit;
        self
    }

    pub fn with_orders_limit(mut self, limit: usize) -> Self {
        self.orders_limit = limit;
        self
    }

    pub fn with_my_trades_limit(mut self, limit: usize) -> Self {
        self.my_trades_limit = limit;
        self
    }

    pub fn with_positions_limit(mut self, limit: usize) -> Self {
        self.positions_limit = limit;
        self
    }

    pub fn with_order_book_depth(mut self, depth: u32) -> Self {
        self.order_book_depth = depth;
        self
    }

    pub fn with_max_pending_deltas(mut self, size: usize) -> Self {
        self.max_pending_deltas = size;
        self
    }

    pub fn with_snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::new("binance");
        assert_eq!(config.venue, VenueId::new("binance"));
        assert_eq!(config.trades_limit, 1000);
        assert_eq!(config.order_book_depth, 1000);
        assert_eq!(config.continuity, ContinuityMode::Gapless);
    }

    #[test]
    fn test_listen_key_cadence() {
        // 30 minute keys refreshed every 20 minutes
        let session = SessionConfig::new(Duration::from_secs(30 * 60), Duration::from_secs(10 * 60));
        assert_eq!(session.renew_after(), Duration::from_secs(20 * 60));
    }
}
