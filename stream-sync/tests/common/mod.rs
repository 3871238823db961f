//! In-memory collaborators for engine integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use stream_sync::{
    BinanceNormalizer, ConnectionId, CredentialSource, EngineConfig, FetchError, SessionIssuer,
    SnapshotProvider, SyncEngine, Transport, TransportError, WsRequest,
};
use sync_core::{DepthSnapshot, Price, PriceLevel, Quantity};
use tokio::sync::Semaphore;

pub type TestEngine = SyncEngine<FakeProvider, RecordingTransport>;

// ============================================================================
// Snapshot provider
// ============================================================================

/// Serves canned snapshots. When gated, each fetch waits for `release()`.
#[derive(Default)]
pub struct FakeProvider {
    snapshots: Mutex<HashMap<String, Result<DepthSnapshot, FetchError>>>,
    gate: Option<Semaphore>,
    fetches: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        FakeProvider {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn set(&self, symbol: &str, snapshot: Result<DepthSnapshot, FetchError>) {
        self.snapshots.lock().insert(symbol.to_uppercase(), snapshot);
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotProvider for FakeProvider {
    async fn fetch_snapshot(
        &self,
        symbol: &str,
        _depth: Option<u32>,
    ) -> Result<DepthSnapshot, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;
            permit.forget();
        }
        self.snapshots
            .lock()
            .get(&symbol.to_uppercase())
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Api {
                code: -1121,
                message: "Invalid symbol.".to_string(),
            }))
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ConnectionId, WsRequest)>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(ConnectionId, WsRequest)> {
        self.sent.lock().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|(_, request)| format!("{} {}", request.method, request.params))
            .collect()
    }

    pub fn last_id(&self) -> Option<u64> {
        self.sent.lock().last().map(|(_, request)| request.id)
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        connection: &ConnectionId,
        request: WsRequest,
    ) -> Result<(), TransportError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Send("socket closed".to_string()));
        }
        self.sent.lock().push((connection.clone(), request));
        Ok(())
    }
}

// ============================================================================
// Session collaborators
// ============================================================================

#[derive(Default)]
pub struct FakeIssuer {
    pub issued: AtomicUsize,
    pub extended: AtomicUsize,
    pub failing: AtomicBool,
}

#[async_trait]
impl SessionIssuer for FakeIssuer {
    async fn issue(&self, _credentials: &dyn CredentialSource) -> Result<String, FetchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Network("connection refused".to_string()));
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("listen-key-{}", n))
    }

    async fn extend(
        &self,
        _credentials: &dyn CredentialSource,
        _token: &str,
    ) -> Result<(), FetchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(FetchError::Api {
                code: -1125,
                message: "This listenKey does not exist.".to_string(),
            });
        }
        self.extended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct StaticCredentials;

impl CredentialSource for StaticCredentials {
    fn api_key(&self) -> &str {
        "test-key"
    }

    fn sign(&self, payload: &str) -> String {
        format!("signed({})", payload)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn spot() -> ConnectionId {
    ConnectionId::new("binance", "spot")
}

pub fn user() -> ConnectionId {
    ConnectionId::new("binance", "user")
}

pub fn engine_with(config: EngineConfig, provider: FakeProvider) -> (Arc<TestEngine>, Arc<FakeProvider>, Arc<RecordingTransport>) {
    let provider = Arc::new(provider);
    let transport = Arc::new(RecordingTransport::new());
    let engine = SyncEngine::new(
        config,
        Arc::clone(&provider),
        Arc::clone(&transport),
        Arc::new(BinanceNormalizer::spot()),
    );
    (Arc::new(engine), provider, transport)
}

/// Engine with `spot()` and `user()` connections open
pub fn open_engine(provider: FakeProvider) -> (Arc<TestEngine>, Arc<FakeProvider>, Arc<RecordingTransport>) {
    let (engine, provider, transport) = engine_with(EngineConfig::new("binance"), provider);
    open(&engine, &spot());
    open(&engine, &user());
    (engine, provider, transport)
}

pub fn open(engine: &TestEngine, conn: &ConnectionId) {
    engine.connect(conn.clone());
    engine.on_open(conn).unwrap();
}

pub fn level(price: &str, quantity: &str) -> PriceLevel {
    PriceLevel::new(Price::parse(price).unwrap(), Quantity::parse(quantity).unwrap())
}

pub fn snapshot(sequence: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> DepthSnapshot {
    DepthSnapshot::new(
        sequence,
        bids.iter().map(|(p, q)| level(p, q)).collect(),
        asks.iter().map(|(p, q)| level(p, q)).collect(),
    )
}

/// Binance `depthUpdate` frame
pub fn depth_update(
    symbol: &str,
    first: u64,
    last: u64,
    bids: &[(&str, &str)],
    asks: &[(&str, &str)],
) -> String {
    json!({
        "e": "depthUpdate",
        "E": 1_700_000_000_000i64 + last as i64,
        "s": symbol,
        "U": first,
        "u": last,
        "b": bids.iter().map(|(p, q)| [p, q]).collect::<Vec<_>>(),
        "a": asks.iter().map(|(p, q)| [p, q]).collect::<Vec<_>>(),
    })
    .to_string()
}

/// Poll until `condition` holds, yielding to spawned tasks in between
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

pub const SHORT: Duration = Duration::from_millis(50);
