use async_trait::async_trait;
use sync_core::DepthSnapshot;

use super::error::{FetchError, SyncError, TransportError};
use super::events::{StreamEvent, WsRequest};
use super::ids::ConnectionId;
use super::topic::Topic;

/// Fetches order book snapshots out of band
///
/// Uses domain-level FetchError to avoid infrastructure leakage.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn fetch_snapshot(
        &self,
        symbol: &str,
        depth: Option<u32>,
    ) -> Result<DepthSnapshot, FetchError>;
}

/// Decodes raw venue messages into canonical events
pub trait Normalizer: Send + Sync {
    /// Decode one text frame. A frame may carry several events (an account
    /// update holds balances and positions). Frames with no canonical
    /// meaning decode to an empty list.
    fn normalize(&self, raw: &str) -> Result<Vec<StreamEvent>, SyncError>;

    /// Venue stream to subscribe for `topic`, if the topic needs one.
    /// Account topics usually ride on a dedicated connection and need none.
    fn stream_name(&self, topic: &Topic) -> Option<String> {
        let _ = topic;
        None
    }
}

/// Outbound half of a connection
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, connection: &ConnectionId, request: WsRequest)
    -> Result<(), TransportError>;
}

/// Signing material for authenticated calls
pub trait CredentialSource: Send + Sync {
    fn api_key(&self) -> &str;

    fn sign(&self, payload: &str) -> String;
}

/// Issues and extends session tokens (listen keys)
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    async fn issue(&self, credentials: &dyn CredentialSource) -> Result<String, FetchError>;

    async fn extend(
        &self,
        credentials: &dyn CredentialSource,
        token: &str,
    ) -> Result<(), FetchError>;
}
