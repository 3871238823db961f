//! Infrastructure Layer - Adapters to a Binance-compatible venue
//!
//! This layer contains the concrete collaborators the engine is generic over:
//! - WsClient / WsTransport: WebSocket streams and the outbound request path
//! - RestClient: depth snapshots and listen-key sessions over HTTP
//! - HmacCredentials: request signing
//! - BinanceNormalizer: venue messages to canonical stream events
//!
//! Follows Hexagonal Architecture:
//! - Domain traits = ports
//! - Infrastructure = adapters (venue ↔ engine)

pub mod parsers;
pub mod rest_client;
pub mod signer;
pub mod ws_client;
pub mod ws_transport;

pub use parsers::BinanceNormalizer;
pub use rest_client::{DepthResponse, RestClient, RestError};
pub use signer::{HmacCredentials, SignerError};
pub use ws_client::{FrameSender, WsClient, WsError};
pub use ws_transport::WsTransport;
