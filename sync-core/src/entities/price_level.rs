use crate::error::CoreError;
use crate::value_objects::{Price, Quantity};
use serde::{Deserialize, Serialize};

/// A single (price, size) entry of a book side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub quantity: Quantity,
}

impl PriceLevel {
    pub fn new(price: Price, quantity: Quantity) -> Self {
        PriceLevel { price, quantity }
    }

    /// Parse a venue `[price, size]` string pair
    pub fn parse(pair: &[String]) -> Result<Self, CoreError> {
        match pair {
            [price, quantity, ..] => Ok(PriceLevel {
                price: Price::parse(price)?,
                quantity: Quantity::parse(quantity)?,
            }),
            other => Err(CoreError::InvalidLevel(other.len())),
        }
    }

    /// Parse a list of `[price, size]` pairs
    pub fn parse_all(pairs: &[[String; 2]]) -> Result<Vec<Self>, CoreError> {
        pairs.iter().map(|pair| PriceLevel::parse(pair)).collect()
    }

    /// Zero-size levels are removals
    pub fn is_empty(&self) -> bool {
        self.quantity.is_zero()
    }
}

impl From<(Price, Quantity)> for PriceLevel {
    fn from((price, quantity): (Price, Quantity)) -> Self {
        PriceLevel { price, quantity }
    }
}
