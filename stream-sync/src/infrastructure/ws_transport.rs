use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::ws_client::{FrameSender, WsClient, WsError};
use crate::domain::{ConnectionId, Transport, TransportError, WsEvent, WsRequest};

/// Routes outbound requests to the socket of each registered connection
#[derive(Default)]
pub struct WsTransport {
    senders: DashMap<ConnectionId, FrameSender>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a socket for `connection` and register its outbound half
    pub async fn open(
        &self,
        connection: &ConnectionId,
        client: &WsClient,
    ) -> Result<mpsc::Receiver<WsEvent>, WsError> {
        let (sender, events) = client.connect().await?;
        self.register(connection.clone(), sender);
        Ok(events)
    }

    pub fn register(&self, connection: ConnectionId, sender: FrameSender) {
        self.senders.insert(connection, sender);
    }

    pub fn remove(&self, connection: &ConnectionId) -> bool {
        self.senders.remove(connection).is_some()
    }

    pub fn is_registered(&self, connection: &ConnectionId) -> bool {
        self.senders.contains_key(connection)
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(
        &self,
        connection: &ConnectionId,
        request: WsRequest,
    ) -> Result<(), TransportError> {
        let frame =
            serde_json::to_string(&request).map_err(|e| TransportError::Encode(e.to_string()))?;
        // Clone the sender out so no map guard is held across the await
        let sender = self
            .senders
            .get(connection)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::NotConnected(connection.to_string()))?;

        sender
            .send(frame)
            .await
            .map_err(|_| TransportError::Send(format!("{} socket closed", connection)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_encodes_request() {
        let transport = WsTransport::new();
        let conn = ConnectionId::new("binance", "spot");
        let (tx, mut rx) = mpsc::channel(4);
        transport.register(conn.clone(), tx);

        transport
            .send(&conn, WsRequest::subscribe(1, vec!["btcusdt@trade".to_string()]))
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            r#"{"method":"SUBSCRIBE","params":["btcusdt@trade"],"id":1}"#
        );
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection() {
        let transport = WsTransport::new();
        let conn = ConnectionId::new("binance", "spot");

        let err = transport
            .send(&conn, WsRequest::subscribe(1, vec![]))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::NotConnected("binance/spot".to_string()));
    }

    #[tokio::test]
    async fn test_send_after_socket_closed() {
        let transport = WsTransport::new();
        let conn = ConnectionId::new("binance", "spot");
        let (tx, rx) = mpsc::channel(4);
        transport.register(conn.clone(), tx);
        drop(rx);

        let err = transport
            .send(&conn, WsRequest::subscribe(1, vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Send(_)));

        assert!(transport.remove(&conn));
        assert!(!transport.is_registered(&conn));
    }
}
