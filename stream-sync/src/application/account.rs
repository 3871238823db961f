//! Account and tape state shared by every connection of a venue
//!
//! Unlike order books, nothing here depends on an unbroken delta sequence,
//! so it survives reconnects.

use std::collections::{BTreeMap, HashMap};

use sync_core::{Balance, BalanceUpdate, Order, Position, PositionSide, Ticker, Trade};

use super::cache::{ArrayCache, KeyedCache};
use super::config::EngineConfig;

/// Per-asset balances of one account type
pub type Balances = BTreeMap<String, Balance>;

type OrderKey = (String, String);
type PositionKey = (String, PositionSide);

pub struct AccountState {
    trades_limit: usize,
    /// Public trade tape per symbol
    trades: HashMap<String, ArrayCache<Trade>>,
    my_trades: KeyedCache<OrderKey, Trade>,
    orders: KeyedCache<OrderKey, Order>,
    positions: KeyedCache<PositionKey, Position>,
    balances: HashMap<String, Balances>,
    tickers: HashMap<String, Ticker>,
}

impl AccountState {
    pub fn new(config: &EngineConfig) -> Self {
        AccountState {
            trades_limit: config.trades_limit,
            trades: HashMap::new(),
            my_trades: KeyedCache::new(config.my_trades_limit),
            orders: KeyedCache::new(config.orders_limit),
            positions: KeyedCache::new(config.positions_limit),
            balances: HashMap::new(),
            tickers: HashMap::new(),
        }
    }

    /// Append a public trade; returns the symbol's tape
    pub fn record_trade(&mut self, trade: Trade) -> Vec<Trade> {
        let limit = self.trades_limit;
        let tape = self
            .trades
            .entry(trade.symbol.clone())
            .or_insert_with(|| ArrayCache::new(limit));
        tape.append(trade);
        tape.snapshot_view()
    }

    pub fn trades(&self, symbol: &str) -> Vec<Trade> {
        self.trades
            .get(symbol)
            .map(ArrayCache::snapshot_view)
            .unwrap_or_default()
    }

    /// Upsert an order. A fill is recorded as an own trade and its fee is
    /// folded into the order; fees and fills accumulated on the cached
    /// record carry over to the replacement.
    pub fn apply_order(&mut self, mut order: Order, execution: Option<Trade>) {
        let key = (order.symbol.clone(), order.id.clone());

        match self.orders.get_mut(&key) {
            Some(cached) => {
                if let Some(trade) = &execution {
                    cached.record_execution(trade.clone());
                }
                order.inherit_accumulated(cached);
            }
            None => {
                if let Some(trade) = &execution {
                    order.record_execution(trade.clone());
                }
            }
        }
        self.orders.upsert(key, order);

        if let Some(trade) = execution {
            self.my_trades
                .upsert((trade.symbol.clone(), trade.id.clone()), trade);
        }
    }

    pub fn orders(&self) -> Vec<Order> {
        self.orders.snapshot_view()
    }

    pub fn orders_for(&self, symbol: &str) -> Vec<Order> {
        self.orders.limit_for(symbol, usize::MAX)
    }

    pub fn order(&self, symbol: &str, id: &str) -> Option<&Order> {
        self.orders.get(&(symbol.to_string(), id.to_string()))
    }

    pub fn my_trades(&self) -> Vec<Trade> {
        self.my_trades.snapshot_view()
    }

    pub fn my_trades_for(&self, symbol: &str) -> Vec<Trade> {
        self.my_trades.limit_for(symbol, usize::MAX)
    }

    pub fn apply_positions(&mut self, positions: Vec<Position>) {
        for position in positions {
            self.positions
                .upsert((position.symbol.clone(), position.side), position);
        }
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.snapshot_view()
    }

    pub fn positions_for(&self, symbol: &str) -> Vec<Position> {
        self.positions.limit_for(symbol, usize::MAX)
    }

    /// Apply a balance change; returns the account type and its balances
    pub fn apply_balance(&mut self, update: BalanceUpdate) -> (String, Balances) {
        match update {
            BalanceUpdate::Snapshot {
                account_type,
                balances,
                ..
            } => {
                let book = self.balances.entry(account_type.clone()).or_default();
                for (asset, balance) in balances {
                    book.insert(asset, balance);
                }
                (account_type, book.clone())
            }
            BalanceUpdate::Delta {
                account_type,
                asset,
                delta,
                ..
            } => {
                let book = self.balances.entry(account_type.clone()).or_default();
                book.entry(asset).or_default().apply_delta(delta);
                (account_type, book.clone())
            }
        }
    }

    pub fn balances(&self, account_type: &str) -> Balances {
        self.balances.get(account_type).cloned().unwrap_or_default()
    }

    pub fn set_ticker(&mut self, ticker: Ticker) {
        self.tickers.insert(ticker.symbol.clone(), ticker);
    }

    pub fn ticker(&self, symbol: &str) -> Option<&Ticker> {
        self.tickers.get(symbol)
    }
}
