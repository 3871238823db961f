//! Decimal price representation
//!
//! Venues publish prices as decimal strings. Parsing them into
//! `rust_decimal::Decimal` keeps every level exact, so two deltas naming
//! "100.10" and "100.1" address the same book level.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

use crate::error::CoreError;

/// Exact decimal price
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

impl Price {
    pub const ZERO: Price = Price(Decimal::ZERO);

    /// Create from a decimal value. Trailing zeros are normalized away so
    /// equal prices always compare and hash equal.
    pub fn new(value: Decimal) -> Self {
        Self(value.normalize())
    }

    /// Parse from string (e.g., "123.45678901")
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Decimal::from_str(s.trim())
            .map(Self::new)
            .map_err(|e| CoreError::InvalidDecimal {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }

    /// Get the inner decimal
    #[inline]
    pub fn inner(self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Decimal> for Price {
    fn from(value: Decimal) -> Self {
        Price::new(value)
    }
}

impl FromStr for Price {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Price::parse(s)
    }
}

impl Add for Price {
    type Output = Price;

    fn add(self, rhs: Self) -> Self::Output {
        Price::new(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Price;

    fn sub(self, rhs: Self) -> Self::Output {
        Price::new(self.0 - rhs.0)
    }
}
