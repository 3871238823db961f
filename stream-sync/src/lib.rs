//! Stream Sync Crate
//!
//! Keeps in-memory replicas of venue state (order books, trade tapes,
//! orders, own trades, positions, balances, tickers) synchronized with
//! incremental WebSocket feeds, and hands consumers awaitable updates.
//!
//! # Architecture
//!
//! The engine:
//! - Reconstructs order books from a REST snapshot plus buffered deltas
//! - Validates sequence continuity and resyncs on gaps
//! - Caches bounded trade, order and position histories
//! - Fans updates out to waiters keyed by topic
//! - Keeps the listen-key session alive for account streams
//!
//! ```text
//! ┌─────────────┐                       ┌─────────────┐
//! │  WebSocket  │                       │    REST     │
//! │  (WsClient) │                       │ (RestClient)│
//! └──────┬──────┘                       └──────┬──────┘
//!        │ WsEvent                snapshots    │  listen keys
//!        ▼                                     ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                     SyncEngine                        │
//! │  ┌─────────────┐  ┌──────────────────────────────┐   │
//! │  │ Normalizer  │─▶│ ConnectionContext (per conn) │   │
//! │  └─────────────┘  │  OrderBookReconstructor ...  │   │
//! │                   └──────────────┬───────────────┘   │
//! │  ┌─────────────┐  ┌──────────────▼───────────────┐   │
//! │  │SessionMgr   │  │ AccountState (caches)        │   │
//! │  └─────────────┘  └──────────────┬───────────────┘   │
//! │                   ┌──────────────▼───────────────┐   │
//! │                   │        TopicRouter           │   │
//! │                   └──────────────┬───────────────┘   │
//! └──────────────────────────────────┼───────────────────┘
//!                                    │ Update
//!                                    ▼
//!                             ┌─────────────┐
//!                             │ Subscribers │
//!                             └─────────────┘
//! ```

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export key types
pub use domain::{
    ConnectionId, ContinuityMode, ContinuityPredicate, ControlMessage, CredentialSource,
    FetchError, Normalizer, SessionIssuer, SnapshotProvider, StreamEvent, SyncError, SyncResult,
    SyncStatus, Topic, Transport, TransportError, VenueId, WsEvent, WsRequest,
};

pub use application::{
    AccountState, ConnectionState, DeltaOutcome, EngineConfig, OrderBook, OrderBookReconstructor,
    SessionConfig, SessionManager, SessionState, Subscription, SyncEngine, TopicRouter, Update,
    WaiterKind,
};

pub use infrastructure::{
    BinanceNormalizer, HmacCredentials, RestClient, RestError, WsClient, WsError, WsTransport,
};

pub use config::{SyncConfigFile, VenueConfig, load_config, load_default_config};
