use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::domain::WsEvent;

#[derive(Error, Debug)]
pub enum WsError {
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Channel closed")]
    ChannelClosed,
}

/// Outbound half of a live socket: already-encoded text frames
pub type FrameSender = mpsc::Sender<String>;

/// WebSocket client for one streaming connection
/// Infrastructure component - handles WebSocket communication
pub struct WsClient {
    url: String,
}

impl WsClient {
    pub fn new(url: impl Into<String>) -> Self {
        WsClient { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect and return channels for sending frames and receiving events.
    ///
    /// Inbound text frames are forwarded undecoded; the engine's normalizer
    /// owns decoding. The event channel ends with `Disconnected` or `Error`.
    pub async fn connect(&self) -> Result<(FrameSender, mpsc::Receiver<WsEvent>), WsError> {
        let (ws_stream, _) = connect_async(&self.url).await?;
        let (mut write, mut read) = ws_stream.split();
        tracing::info!("connected to {}", self.url);

        let (frame_tx, mut frame_rx) = mpsc::channel::<String>(32);
        let (event_tx, event_rx) = mpsc::channel::<WsEvent>(1024);

        let event_tx_clone = event_tx.clone();
        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                if let Err(e) = write.send(Message::Text(frame.into())).await {
                    let _ = event_tx_clone.send(WsEvent::Error(e.to_string())).await;
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if event_tx.send(WsEvent::Message(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::debug!("close frame: {:?}", frame);
                        let _ = event_tx.send(WsEvent::Disconnected).await;
                        return;
                    }
                    Ok(Message::Ping(data)) => {
                        tracing::trace!("Received ping: {:?}", data);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = event_tx.send(WsEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }
            let _ = event_tx.send(WsEvent::Disconnected).await;
        });

        Ok((frame_tx, event_rx))
    }
}
