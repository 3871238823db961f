use serde::{Deserialize, Serialize};
use serde_json::Value;
use sync_core::{BalanceUpdate, DepthDelta, Order, Position, Ticker, Trade};

/// Canonical event decoded from one venue message
///
/// Every venue message is classified into this closed set at the boundary,
/// so the engine's dispatch is an exhaustive match.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    OrderBookDelta(DepthDelta),
    /// Public trade print
    Trade(Trade),
    /// Order state change, with the fill that caused it when there was one
    OrderUpdate {
        order: Order,
        execution: Option<Trade>,
    },
    PositionUpdate(Vec<Position>),
    BalanceUpdate(BalanceUpdate),
    Ticker(Ticker),
    Control(ControlMessage),
}

/// Non-data traffic on a connection
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Successful response to request `id`
    Response { id: u64, result: Option<Value> },
    /// Venue error, tied to a request when `id` is present
    ApiError {
        id: Option<u64>,
        code: i64,
        msg: String,
    },
    /// The venue announced that the session token is no longer valid
    SessionExpired,
}

/// Wire shapes of a Binance-compatible connection
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Envelope {
    /// Error response. Tried first: a missing `result` would otherwise
    /// decode an error as an empty result.
    Error {
        id: Option<u64>,
        code: i64,
        msg: String,
    },
    /// Successful response to a request
    Result { id: u64, result: Option<Value> },
    /// Combined-stream payload
    Stream { stream: String, data: Value },
    /// Raw event on a single-stream connection
    Event(Value),
}

/// Connection-level events produced by the WebSocket client
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    /// Text frame, undecoded
    Message(String),
    /// Connection error
    Error(String),
    /// Disconnected
    Disconnected,
}

/// Outbound request (Binance-compatible)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WsRequest {
    pub method: String,
    pub params: Value,
    pub id: u64,
}

impl WsRequest {
    pub fn call(id: u64, method: impl Into<String>, params: Value) -> Self {
        WsRequest {
            method: method.into(),
            params,
            id,
        }
    }

    pub fn subscribe(id: u64, streams: Vec<String>) -> Self {
        Self::call(id, "SUBSCRIBE", Value::from(streams))
    }

    pub fn unsubscribe(id: u64, streams: Vec<String>) -> Self {
        Self::call(id, "UNSUBSCRIBE", Value::from(streams))
    }
}
