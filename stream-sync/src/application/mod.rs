pub mod account;
pub mod cache;
pub mod config;
pub mod connection;
pub mod engine;
pub mod reconstructor;
pub mod router;
pub mod session;

pub use account::{AccountState, Balances};
pub use cache::{ArrayCache, KeyedCache, Partitioned};
pub use config::{EngineConfig, SessionConfig};
pub use connection::{ConnectionContext, ConnectionState};
pub use engine::{Subscription, SyncEngine, Update};
pub use reconstructor::{DeltaOutcome, OrderBook, OrderBookReconstructor, OrderBookState};
pub use router::{Registration, Resolution, TopicRouter, Waiter, WaiterId, WaiterKind};
pub use session::{SessionManager, SessionState, SessionToken};
