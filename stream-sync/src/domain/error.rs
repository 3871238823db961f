use thiserror::Error;

/// Domain error for snapshot and session HTTP calls
///
/// Infrastructure implementations convert their specific errors to this type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    /// Network or communication failure
    #[error("Network error: {0}")]
    Network(String),
    /// API returned an error response
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },
    /// Failed to parse the response
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Failure to hand a message to a connection
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("connection {0} is not registered")]
    NotConnected(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Errors surfaced to subscribers
///
/// Cloned once per waiter when a topic is rejected, hence `Clone`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("stale delta for {symbol}: end {end_seq} <= book sequence {sequence}")]
    StaleDelta {
        symbol: String,
        sequence: u64,
        end_seq: u64,
    },

    #[error("sequence gap on {symbol}: book at {sequence}, delta covers {start_seq}..={end_seq}")]
    SequenceGap {
        symbol: String,
        sequence: u64,
        start_seq: u64,
        end_seq: u64,
    },

    #[error("pending delta buffer for {symbol} exceeded {limit} entries before a snapshot arrived")]
    BufferOverflow { symbol: String, limit: usize },

    #[error("authentication expired: {0}")]
    AuthExpired(String),

    #[error("transport lost: {0}")]
    TransportLost(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("snapshot failed: {0}")]
    Snapshot(#[from] FetchError),

    #[error("venue rejected request: {code} {msg}")]
    Api { code: i64, msg: String },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("subscription closed")]
    Unsubscribed,

    #[error("connection {0} is not open")]
    ConnectionNotOpen(String),

    #[error("unknown connection {0}")]
    UnknownConnection(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::Api {
            code: -1121,
            message: "Invalid symbol.".to_string(),
        };
        assert_eq!(err.to_string(), "API error -1121: Invalid symbol.");
    }

    #[test]
    fn test_gap_display() {
        let err = SyncError::SequenceGap {
            symbol: "BTCUSDT".to_string(),
            sequence: 100,
            start_seq: 103,
            end_seq: 105,
        };
        assert_eq!(
            err.to_string(),
            "sequence gap on BTCUSDT: book at 100, delta covers 103..=105"
        );
    }

    #[test]
    fn test_fetch_error_converts() {
        let err: SyncError = FetchError::Network("reset".to_string()).into();
        assert!(matches!(err, SyncError::Snapshot(FetchError::Network(_))));
    }
}
