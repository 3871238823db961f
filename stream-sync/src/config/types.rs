use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::{EngineConfig, SessionConfig};
use crate::domain::{ConnectionId, ContinuityMode};

/// Root of the JSON configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfigFile {
    pub venues: Vec<VenueConfig>,
    #[serde(default)]
    pub global: GlobalConfig,
}

/// One venue connection to open at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Market segment carried by the connection (spot, future)
    #[serde(default = "default_market")]
    pub market: String,
    pub ws_url: String,
    pub rest_url: String,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub continuity: ContinuityMode,
    /// Overrides the global default depth
    #[serde(default)]
    pub order_book_depth: Option<u32>,
    /// Environment variable holding the API key, for account streams
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub api_secret_env: Option<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_market() -> String {
    "spot".to_string()
}

impl VenueConfig {
    pub fn connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.id.as_str(), self.market.as_str())
    }

    pub fn is_futures(&self) -> bool {
        self.market.eq_ignore_ascii_case("future") || self.market.eq_ignore_ascii_case("futures")
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key_env.is_some() && self.api_secret_env.is_some()
    }

    /// Engine settings for this venue on top of the global defaults
    pub fn engine_config(&self, global: &GlobalConfig) -> EngineConfig {
        let positions_limit = global.positions_limit.unwrap_or(usize::MAX);
        EngineConfig::new(self.id.as_str())
            .with_continuity(self.continuity)
            .with_trades_limit(global.trades_limit)
            .with_orders_limit(global.orders_limit)
            .with_my_trades_limit(global.my_trades_limit)
            .with_positions_limit(positions_limit)
            .with_order_book_depth(self.order_book_depth.unwrap_or(global.order_book_depth))
            .with_max_pending_deltas(global.max_pending_deltas)
            .with_snapshot_timeout(Duration::from_millis(global.snapshot_timeout_ms))
            .with_heartbeat_interval(Duration::from_millis(global.heartbeat_interval_ms))
    }
}

/// Defaults shared by every venue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_cache_limit")]
    pub trades_limit: usize,
    #[serde(default = "default_cache_limit")]
    pub orders_limit: usize,
    #[serde(default = "default_cache_limit")]
    pub my_trades_limit: usize,
    /// Unbounded when absent
    #[serde(default)]
    pub positions_limit: Option<usize>,
    #[serde(default = "default_order_book_depth")]
    pub order_book_depth: u32,
    #[serde(default = "default_max_pending_deltas")]
    pub max_pending_deltas: usize,
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default)]
    pub session: SessionSettings,
}

fn default_cache_limit() -> usize {
    1000
}

fn default_order_book_depth() -> u32 {
    1000
}

fn default_max_pending_deltas() -> usize {
    1000
}

fn default_snapshot_timeout_ms() -> u64 {
    10_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            trades_limit: default_cache_limit(),
            orders_limit: default_cache_limit(),
            my_trades_limit: default_cache_limit(),
            positions_limit: None,
            order_book_depth: default_order_book_depth(),
            max_pending_deltas: default_max_pending_deltas(),
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            session: SessionSettings::default(),
        }
    }
}

/// Listen-key session timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,
    #[serde(default = "default_renewal_timeout_ms")]
    pub renewal_timeout_ms: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_safety_margin_secs() -> u64 {
    600
}

fn default_renewal_timeout_ms() -> u64 {
    10_000
}

fn default_retry_interval_ms() -> u64 {
    5_000
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            ttl_secs: default_ttl_secs(),
            safety_margin_secs: default_safety_margin_secs(),
            renewal_timeout_ms: default_renewal_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl SessionSettings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(
            Duration::from_secs(self.ttl_secs),
            Duration::from_secs(self.safety_margin_secs),
        )
        .with_renewal_timeout(Duration::from_millis(self.renewal_timeout_ms))
        .with_retry_interval(Duration::from_millis(self.retry_interval_ms))
    }
}
