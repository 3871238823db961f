//! Topic keys
//!
//! A topic names one logical stream multiplexed over a physical connection.
//! Keys are plain strings so venues can mint their own, but the engine's
//! built-in families are created through the constructors below. The router
//! is shared by every connection, so the engine qualifies each key with the
//! connection that carries it (`binance/spot#orderbook:BTCUSDT`).

use std::fmt;

use super::ids::ConnectionId;

const CONNECTION_SEPARATOR: char = '#';

const ORDER_BOOK: &str = "orderbook";
const TRADES: &str = "trades";
const TICKER: &str = "ticker";
const ORDERS: &str = "orders";
const MY_TRADES: &str = "myTrades";
const POSITIONS: &str = "positions";
const BALANCE: &str = "balance";
const REQUEST: &str = "request";

/// Families that require an authenticated session
const AUTHENTICATED: [&str; 4] = [ORDERS, MY_TRADES, POSITIONS, BALANCE];

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    pub fn new(key: impl Into<String>) -> Self {
        Topic(key.into())
    }

    fn scoped(family: &str, scope: &str) -> Self {
        Topic(format!("{}:{}", family, scope))
    }

    pub fn order_book(symbol: &str) -> Self {
        Self::scoped(ORDER_BOOK, &symbol.to_uppercase())
    }

    pub fn trades(symbol: &str) -> Self {
        Self::scoped(TRADES, &symbol.to_uppercase())
    }

    pub fn ticker(symbol: &str) -> Self {
        Self::scoped(TICKER, &symbol.to_uppercase())
    }

    /// All orders of the account
    pub fn orders() -> Self {
        Topic::new(ORDERS)
    }

    pub fn orders_for(symbol: &str) -> Self {
        Self::scoped(ORDERS, &symbol.to_uppercase())
    }

    pub fn my_trades() -> Self {
        Topic::new(MY_TRADES)
    }

    pub fn my_trades_for(symbol: &str) -> Self {
        Self::scoped(MY_TRADES, &symbol.to_uppercase())
    }

    pub fn positions() -> Self {
        Topic::new(POSITIONS)
    }

    pub fn positions_for(symbol: &str) -> Self {
        Self::scoped(POSITIONS, &symbol.to_uppercase())
    }

    /// Balance of one account type (spot, margin, future, ...)
    pub fn balance(account_type: &str) -> Self {
        Self::scoped(BALANCE, &account_type.to_lowercase())
    }

    /// Balance changes of any account type
    pub fn balance_any() -> Self {
        Topic::new(BALANCE)
    }

    /// One-shot response to request `id`
    pub fn request(id: u64) -> Self {
        Topic(format!("{}:{}", REQUEST, id))
    }

    /// Bind this topic to `connection`, replacing any previous binding
    pub fn on(&self, connection: &ConnectionId) -> Self {
        Topic(format!("{}{}{}", connection, CONNECTION_SEPARATOR, self.key()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key without the connection qualifier
    pub fn key(&self) -> &str {
        self.0
            .split_once(CONNECTION_SEPARATOR)
            .map_or(self.0.as_str(), |(_, key)| key)
    }

    /// Connection qualifier, if bound
    pub fn connection(&self) -> Option<&str> {
        self.0
            .split_once(CONNECTION_SEPARATOR)
            .map(|(connection, _)| connection)
    }

    pub fn family(&self) -> &str {
        let key = self.key();
        key.split(':').next().unwrap_or(key)
    }

    /// Text after the family separator, if any (symbol or account type)
    pub fn scope(&self) -> Option<&str> {
        self.key().split_once(':').map(|(_, scope)| scope)
    }

    /// Whether this topic is bound to `connection`
    pub fn is_on(&self, connection: &ConnectionId) -> bool {
        self.connection()
            .is_some_and(|bound| bound == connection.to_string())
    }

    pub fn is_order_book(&self) -> bool {
        self.family() == ORDER_BOOK
    }

    /// Whether this topic is void without a valid session
    pub fn is_authenticated(&self) -> bool {
        AUTHENTICATED.contains(&self.family())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Topic::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_topics_normalize_case() {
        assert_eq!(Topic::order_book("btcusdt").as_str(), "orderbook:BTCUSDT");
        assert_eq!(Topic::order_book("btcusdt"), Topic::order_book("BTCUSDT"));
        assert_eq!(Topic::balance("SPOT").as_str(), "balance:spot");
    }

    #[test]
    fn test_family_and_scope() {
        let topic = Topic::orders_for("ethusdt");
        assert_eq!(topic.family(), "orders");
        assert_eq!(topic.scope(), Some("ETHUSDT"));
        assert_eq!(Topic::orders().scope(), None);
    }

    #[test]
    fn test_connection_qualifier() {
        let spot = ConnectionId::new("binance", "spot");
        let topic = Topic::order_book("BTCUSDT").on(&spot);

        assert_eq!(topic.as_str(), "binance/spot#orderbook:BTCUSDT");
        assert_eq!(topic.key(), "orderbook:BTCUSDT");
        assert_eq!(topic.connection(), Some("binance/spot"));
        assert_eq!(topic.family(), "orderbook");
        assert_eq!(topic.scope(), Some("BTCUSDT"));
        assert!(topic.is_order_book());

        let futures = ConnectionId::new("binance", "future");
        assert_ne!(topic, Topic::order_book("BTCUSDT").on(&futures));
        assert_eq!(topic.on(&futures).key(), "orderbook:BTCUSDT");
        assert!(topic.is_on(&spot));
        assert!(!topic.is_on(&futures));
        assert!(!Topic::order_book("BTCUSDT").is_on(&spot));
        assert!(Topic::orders().on(&spot).is_authenticated());
    }

    #[test]
    fn test_authenticated_families() {
        assert!(Topic::orders().is_authenticated());
        assert!(Topic::balance("spot").is_authenticated());
        assert!(Topic::positions_for("BTCUSDT").is_authenticated());
        assert!(!Topic::order_book("BTCUSDT").is_authenticated());
        assert!(!Topic::request(7).is_authenticated());
    }
}
