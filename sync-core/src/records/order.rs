use crate::records::Trade;
use crate::value_objects::{Price, Quantity, Side, TimestampMs};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Closed,
    Canceled,
    Expired,
    Rejected,
}

impl OrderStatus {
    /// Map a venue status string. Unknown statuses are treated as open.
    pub fn from_venue(status: &str) -> Self {
        match status.to_ascii_uppercase().as_str() {
            "FILLED" | "CLOSED" => OrderStatus::Closed,
            "CANCELED" | "CANCELLED" | "PENDING_CANCEL" => OrderStatus::Canceled,
            "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
            "REJECTED" => OrderStatus::Rejected,
            _ => OrderStatus::Open,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Open)
    }
}

/// Fee charged in one currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fee {
    pub currency: String,
    pub cost: Quantity,
}

impl Fee {
    pub fn new(currency: impl Into<String>, cost: Quantity) -> Self {
        Fee {
            currency: currency.into(),
            cost,
        }
    }
}

/// Canonical order record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub status: OrderStatus,
    #[serde(default)]
    pub price: Option<Price>,
    pub amount: Quantity,
    pub filled: Quantity,
    #[serde(default)]
    pub average: Option<Price>,
    pub timestamp: TimestampMs,
    #[serde(default)]
    pub last_update: Option<TimestampMs>,
    /// Running fee totals, one entry per currency
    #[serde(default)]
    pub fees: Vec<Fee>,
    /// Executions attributed to this order
    #[serde(default)]
    pub trades: Vec<Trade>,
}

impl Order {
    pub fn new(
        id: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        amount: Quantity,
        timestamp: TimestampMs,
    ) -> Self {
        Order {
            id: id.into(),
            client_order_id: None,
            symbol: symbol.into(),
            side,
            status: OrderStatus::Open,
            price: None,
            amount,
            filled: Quantity::ZERO,
            average: None,
            timestamp,
            last_update: None,
            fees: Vec::new(),
            trades: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_price(mut self, price: Price) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_filled(mut self, filled: Quantity) -> Self {
        self.filled = filled;
        self
    }

    /// Fold a fee into the running totals, summing costs in the same currency
    pub fn add_fee(&mut self, fee: Fee) {
        match self.fees.iter_mut().find(|f| f.currency == fee.currency) {
            Some(existing) => existing.cost += fee.cost,
            None => self.fees.push(fee),
        }
    }

    /// Attach an execution, folding its fee into the running totals
    pub fn record_execution(&mut self, trade: Trade) {
        if let Some(fee) = trade.fee.clone() {
            self.add_fee(fee);
        }
        self.trades.push(trade);
    }

    /// Carry accumulated fees and executions over from the record this one replaces.
    /// A venue order update reports the order's own fields only, never the totals.
    pub fn inherit_accumulated(&mut self, previous: &Order) {
        if self.fees.is_empty() {
            self.fees = previous.fees.clone();
        }
        if self.trades.is_empty() {
            self.trades = previous.trades.clone();
        }
    }

    pub fn remaining(&self) -> Quantity {
        self.amount - self.filled
    }
}
