use crate::value_objects::{Quantity, TimestampMs};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Balance of one asset within an account type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Balance {
    #[serde(default)]
    pub free: Option<Quantity>,
    #[serde(default)]
    pub used: Option<Quantity>,
    #[serde(default)]
    pub total: Option<Quantity>,
}

impl Balance {
    pub fn new(free: Quantity, used: Quantity) -> Self {
        Balance {
            free: Some(free),
            used: Some(used),
            total: Some(free + used),
        }
    }

    /// Apply a signed change to the free amount. Used/total become unknown
    /// because a single-asset delta does not report them.
    pub fn apply_delta(&mut self, delta: Decimal) {
        let free = self.free.map(|q| q.inner()).unwrap_or_default() + delta;
        self.free = Some(Quantity::new(free));
        self.used = None;
        self.total = None;
    }
}

/// Account balance change as reported by a venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BalanceUpdate {
    /// Full per-asset state for the listed assets
    Snapshot {
        account_type: String,
        balances: Vec<(String, Balance)>,
        timestamp: TimestampMs,
    },
    /// Signed change to one asset's free amount
    Delta {
        account_type: String,
        asset: String,
        delta: Decimal,
        timestamp: TimestampMs,
    },
}

impl BalanceUpdate {
    pub fn account_type(&self) -> &str {
        match self {
            BalanceUpdate::Snapshot { account_type, .. } => account_type,
            BalanceUpdate::Delta { account_type, .. } => account_type,
        }
    }

    pub fn timestamp(&self) -> TimestampMs {
        match self {
            BalanceUpdate::Snapshot { timestamp, .. } => *timestamp,
            BalanceUpdate::Delta { timestamp, .. } => *timestamp,
        }
    }
}
