use std::path::Path;
use thiserror::Error;

use super::types::{SyncConfigFile, VenueConfig};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("No enabled venues in config")]
    NoEnabledVenues,
    #[error("Venue not found: {0}")]
    VenueNotFound(String),
    #[error("Session safety margin {margin_secs}s must be below the TTL {ttl_secs}s")]
    InvalidSafetyMargin { ttl_secs: u64, margin_secs: u64 },
    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
    #[error("{0} must be a non-zero duration")]
    ZeroInterval(&'static str),
}

/// Load sync configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Load configuration from a JSON string
pub fn load_config_from_str(json: &str) -> Result<SyncConfigFile, ConfigError> {
    let config: SyncConfigFile = serde_json::from_str(json)?;
    Ok(config)
}

/// Load the default embedded configuration
pub fn load_default_config() -> Result<SyncConfigFile, ConfigError> {
    let default_config = include_str!("sync_config.json");
    load_config_from_str(default_config)
}

impl SyncConfigFile {
    /// Get only enabled venues
    pub fn enabled_venues(&self) -> Vec<&VenueConfig> {
        self.venues.iter().filter(|v| v.enabled).collect()
    }

    /// Get a specific venue by ID
    pub fn get_venue(&self, id: &str) -> Result<&VenueConfig, ConfigError> {
        self.venues
            .iter()
            .find(|v| v.id == id)
            .ok_or_else(|| ConfigError::VenueNotFound(id.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled_venues().is_empty() {
            return Err(ConfigError::NoEnabledVenues);
        }

        let session = &self.global.session;
        if session.safety_margin_secs >= session.ttl_secs {
            return Err(ConfigError::InvalidSafetyMargin {
                ttl_secs: session.ttl_secs,
                margin_secs: session.safety_margin_secs,
            });
        }

        let global = &self.global;
        let capacities = [
            ("trades_limit", global.trades_limit),
            ("orders_limit", global.orders_limit),
            ("my_trades_limit", global.my_trades_limit),
            ("positions_limit", global.positions_limit.unwrap_or(usize::MAX)),
            ("order_book_depth", global.order_book_depth as usize),
            ("max_pending_deltas", global.max_pending_deltas),
        ];
        if let Some((name, _)) = capacities.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroCapacity(name));
        }
        if self
            .venues
            .iter()
            .any(|v| v.order_book_depth == Some(0))
        {
            return Err(ConfigError::ZeroCapacity("order_book_depth"));
        }

        let intervals = [
            ("heartbeat_interval_ms", global.heartbeat_interval_ms),
            ("snapshot_timeout_ms", global.snapshot_timeout_ms),
            ("session.renewal_timeout_ms", session.renewal_timeout_ms),
            ("session.retry_interval_ms", session.retry_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroInterval(name));
        }

        Ok(())
    }
}
