//! Account streams, connection failures and session expiry through the engine

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use rust_decimal_macros::dec;
use serde_json::json;
use stream_sync::{
    BinanceNormalizer, ConnectionState, EngineConfig, SessionConfig, SessionManager,
    SessionState, SyncEngine, SyncError, SyncStatus, Topic, Update, WsEvent,
};
use sync_core::{Fee, OrderStatus, Quantity};
use tokio::sync::mpsc;

fn execution_report(order_id: u64, status: &str, filled: &str, fill: Option<(u64, &str, &str)>) -> String {
    let (execution_type, trade_id, last_qty, fee) = match fill {
        Some((trade_id, qty, fee)) => ("TRADE", trade_id as i64, qty, fee),
        None => ("NEW", -1, "0", "0"),
    };
    json!({
        "e": "executionReport",
        "E": 1_700_000_000_000i64,
        "s": "BTCUSDT",
        "c": "client-1",
        "S": "BUY",
        "o": "LIMIT",
        "q": "2",
        "p": "100",
        "x": execution_type,
        "X": status,
        "i": order_id,
        "l": last_qty,
        "z": filled,
        "L": "100",
        "n": fee,
        "N": if fill.is_some() { json!("BNB") } else { json!(null) },
        "T": 1_700_000_000_000i64,
        "t": trade_id,
        "m": false,
        "O": 1_699_999_999_000i64,
        "Z": "0",
    })
    .to_string()
}

fn trade_frame(id: u64) -> String {
    json!({
        "e": "trade", "E": 1, "s": "BTCUSDT", "t": id, "p": "100", "q": "1",
        "b": 1, "a": 2, "T": id, "m": false, "M": true,
    })
    .to_string()
}

fn engine_with_session(
    issuer: Arc<FakeIssuer>,
    session_config: SessionConfig,
) -> (Arc<TestEngine>, Arc<SessionManager>) {
    let session = Arc::new(SessionManager::new(
        session_config,
        issuer,
        Arc::new(StaticCredentials),
    ));
    let engine = SyncEngine::new(
        EngineConfig::new("binance"),
        Arc::new(FakeProvider::new()),
        Arc::new(RecordingTransport::new()),
        Arc::new(BinanceNormalizer::spot()),
    )
    .with_session(Arc::clone(&session));
    let engine = Arc::new(engine);
    open(&engine, &spot());
    open(&engine, &user());
    (engine, session)
}

// ============================================================================
// Orders and own trades
// ============================================================================

#[tokio::test]
async fn test_fills_accumulate_fees_and_own_trades() {
    let (engine, _provider, transport) = open_engine(FakeProvider::new());

    let watcher = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.watch_orders(&user(), None).await })
    };
    let topic = Topic::orders().on(&user());
    eventually(|| engine.router().is_active(&topic)).await;

    engine.handle_message(&user(), &execution_report(1, "NEW", "0", None));
    let mut orders = watcher.await.unwrap().unwrap();
    match orders.latest() {
        Some(Ok(Update::Orders(list))) => assert_eq!(list[0].status, OrderStatus::Open),
        other => panic!("unexpected {:?}", other),
    }

    engine.handle_message(&user(), &execution_report(1, "PARTIALLY_FILLED", "1", Some((7, "1", "0.01"))));
    engine.handle_message(&user(), &execution_report(1, "FILLED", "2", Some((8, "1", "0.02"))));

    let Update::Orders(list) = orders.recv().await.unwrap() else {
        panic!("expected orders");
    };
    assert_eq!(list.len(), 1);
    let order = &list[0];
    assert_eq!(order.status, OrderStatus::Closed);
    assert_eq!(order.filled, Quantity::from(dec!(2)));
    assert_eq!(order.fees, vec![Fee::new("BNB", Quantity::from(dec!(0.03)))]);
    assert_eq!(order.trades.len(), 2);

    let mine = engine.my_trades();
    assert_eq!(mine.len(), 2);
    assert!(mine.iter().all(|t| t.order_id.as_deref() == Some("1")));

    // Account streams need no venue subscription
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_symbol_scoped_my_trades() {
    let (engine, _provider, _transport) = open_engine(FakeProvider::new());

    let watcher = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.watch_my_trades(&user(), Some("btcusdt")).await })
    };
    let topic = Topic::my_trades_for("BTCUSDT").on(&user());
    eventually(|| engine.router().is_active(&topic)).await;

    // No fill yet: the watch keeps waiting
    engine.handle_message(&user(), &execution_report(3, "NEW", "0", None));
    engine.handle_message(&user(), &execution_report(3, "FILLED", "2", Some((9, "2", "0.1"))));

    let sub = watcher.await.unwrap().unwrap();
    let Some(Ok(Update::MyTrades(trades))) = sub.latest() else {
        panic!("expected own trades");
    };
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].id, "9");
}

// ============================================================================
// Positions, balances, tapes
// ============================================================================

#[tokio::test]
async fn test_balance_resolves_account_and_wildcard_topics() {
    let (engine, _provider, _transport) = open_engine(FakeProvider::new());

    let spot_balance = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.watch_balance(&user(), Some("spot")).await })
    };
    let any_balance = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.watch_balance(&user(), None).await })
    };
    eventually(|| {
        engine.router().is_active(&Topic::balance("spot").on(&user()))
            && engine.router().is_active(&Topic::balance_any().on(&user()))
    })
    .await;

    engine.handle_message(
        &user(),
        r#"{"e":"outboundAccountPosition","E":1,"u":1,"B":[{"a":"USDT","f":"100","l":"20"}]}"#,
    );
    let spot_balance = spot_balance.await.unwrap().unwrap();
    let mut any_balance = any_balance.await.unwrap().unwrap();

    engine.handle_message(&user(), r#"{"e":"balanceUpdate","E":2,"a":"USDT","d":"-30","T":2}"#);
    let Update::Balance(balances) = any_balance.recv().await.unwrap() else {
        panic!("expected balances");
    };
    assert_eq!(balances["USDT"].free, Some(Quantity::from(dec!(70))));
    assert_eq!(balances["USDT"].total, None);
    assert!(matches!(spot_balance.latest(), Some(Ok(Update::Balance(_)))));
    assert_eq!(engine.balances("spot")["USDT"].free, Some(Quantity::from(dec!(70))));
}

#[tokio::test]
async fn test_positions_upsert_per_symbol_and_side() {
    let (engine, _provider, _transport) = open_engine(FakeProvider::new());

    let watcher = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.watch_positions(&user(), Some("BTCUSDT")).await })
    };
    eventually(|| engine.router().is_active(&Topic::positions_for("BTCUSDT").on(&user()))).await;

    let update = |amount: &str| {
        json!({
            "e": "ACCOUNT_UPDATE", "E": 1, "T": 1,
            "a": {"m": "ORDER", "B": [], "P": [
                {"s": "BTCUSDT", "pa": amount, "ep": "100", "up": "0", "ps": "LONG"},
                {"s": "ETHUSDT", "pa": "3", "ep": "10", "up": "0", "ps": "LONG"}
            ]}
        })
        .to_string()
    };
    engine.handle_message(&user(), &update("1"));
    let mut sub = watcher.await.unwrap().unwrap();

    engine.handle_message(&user(), &update("2"));
    let Update::Positions(positions) = sub.recv().await.unwrap() else {
        panic!("expected positions");
    };
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].contracts, Quantity::from(dec!(2)));
    assert_eq!(engine.positions().len(), 2);
}

#[tokio::test]
async fn test_trade_tape_is_bounded() {
    let config = EngineConfig::new("binance").with_trades_limit(2);
    let (engine, _provider, transport) = engine_with(config, FakeProvider::new());
    open(&engine, &spot());

    let watcher = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.watch_trades(&spot(), "BTCUSDT").await })
    };
    eventually(|| transport.sent().len() == 1).await;
    assert_eq!(transport.methods(), vec![r#"SUBSCRIBE ["btcusdt@trade"]"#.to_string()]);

    for id in 1..=3 {
        engine.handle_message(&spot(), &trade_frame(id));
    }
    let sub = watcher.await.unwrap().unwrap();
    assert!(matches!(sub.latest(), Some(Ok(Update::Trades(_)))));

    let tape = engine.trades("BTCUSDT");
    let ids: Vec<&str> = tape.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["2", "3"]);
}

#[tokio::test]
async fn test_multi_ticker_watch() {
    let (engine, _provider, transport) = open_engine(FakeProvider::new());

    let watcher = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.watch_tickers(&spot(), &["BTCUSDT", "ETHUSDT"]).await })
    };
    eventually(|| transport.sent().len() == 2).await;

    engine.handle_message(
        &spot(),
        r#"{"e":"24hrTicker","E":5,"s":"ETHUSDT","c":"3000","b":"2999","a":"3001","h":"3100","l":"2900","v":"10"}"#,
    );
    let sub = watcher.await.unwrap().unwrap();
    let Some(Ok(Update::Ticker(ticker))) = sub.latest() else {
        panic!("expected a ticker");
    };
    assert_eq!(ticker.symbol, "ETHUSDT");
    assert_eq!(engine.ticker("ethusdt"), Some(ticker));
}

// ============================================================================
// Connection failures
// ============================================================================

#[tokio::test]
async fn test_disconnect_rejects_topics_but_keeps_account_state() {
    let provider = FakeProvider::new();
    provider.set("BTCUSDT", Ok(snapshot(10, &[("100", "5")], &[("101", "3")])));
    let (engine, _provider, _transport) = open_engine(provider);

    let mut book = engine.watch_order_book(&spot(), "BTCUSDT", None).await.unwrap();
    let watcher = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.watch_orders(&user(), None).await })
    };
    eventually(|| engine.router().is_active(&Topic::orders().on(&user()))).await;
    engine.handle_message(&user(), &execution_report(1, "NEW", "0", None));
    let mut orders = watcher.await.unwrap().unwrap();

    // Driving the user socket to a close
    let (tx, rx) = mpsc::channel(8);
    let driver = tokio::spawn(Arc::clone(&engine).drive(user(), rx));
    tx.send(WsEvent::Disconnected).await.unwrap();
    driver.await.unwrap();

    assert!(matches!(orders.recv().await, Err(SyncError::TransportLost(_))));
    assert_eq!(engine.connection_state(&user()), Some(ConnectionState::Closed));
    assert_eq!(engine.orders().len(), 1);

    // The market connection is independent
    assert_eq!(engine.book_status(&spot(), "BTCUSDT"), SyncStatus::Synced);

    engine.on_disconnect(&spot(), "ping timeout");
    assert_eq!(
        book.recv().await.unwrap_err(),
        SyncError::TransportLost("ping timeout".to_string())
    );
    assert_eq!(engine.book_status(&spot(), "BTCUSDT"), SyncStatus::Uninitialized);

    // Messages on a closed connection are ignored
    engine.handle_message(&user(), &execution_report(2, "NEW", "0", None));
    assert_eq!(engine.orders().len(), 1);

    // Reconnecting keeps the cached orders
    open(&engine, &user());
    engine.handle_message(&user(), &execution_report(2, "NEW", "0", None));
    assert_eq!(engine.orders().len(), 2);
}

#[tokio::test]
async fn test_driver_dispatches_messages_until_error() {
    let (engine, _provider, _transport) = open_engine(FakeProvider::new());
    let (tx, rx) = mpsc::channel(8);
    let driver = tokio::spawn(Arc::clone(&engine).drive(user(), rx));

    tx.send(WsEvent::Message(execution_report(5, "NEW", "0", None)))
        .await
        .unwrap();
    tx.send(WsEvent::Error("connection reset".to_string()))
        .await
        .unwrap();
    driver.await.unwrap();

    assert_eq!(engine.orders().len(), 1);
    assert_eq!(engine.connection_state(&user()), Some(ConnectionState::Closed));
}

#[tokio::test]
async fn test_replaced_connection_ignores_its_old_driver() {
    let (engine, _provider, _transport) = open_engine(FakeProvider::new());
    let (old_tx, old_rx) = mpsc::channel(8);
    old_tx
        .send(WsEvent::Message(execution_report(1, "NEW", "0", None)))
        .await
        .unwrap();
    old_tx.send(WsEvent::Disconnected).await.unwrap();
    let old_driver = Arc::clone(&engine).drive(user(), old_rx);

    // The socket is replaced before its driver gets to run
    open(&engine, &user());
    tokio::spawn(old_driver).await.unwrap();

    assert!(engine.orders().is_empty());
    assert_eq!(engine.connection_state(&user()), Some(ConnectionState::Open));

    let (new_tx, new_rx) = mpsc::channel(8);
    let new_driver = tokio::spawn(Arc::clone(&engine).drive(user(), new_rx));
    new_tx
        .send(WsEvent::Message(execution_report(2, "NEW", "0", None)))
        .await
        .unwrap();
    drop(new_tx);
    new_driver.await.unwrap();

    assert_eq!(engine.orders().len(), 1);
    assert_eq!(engine.connection_state(&user()), Some(ConnectionState::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_silent_connection_degrades_and_recovers() {
    let config = EngineConfig::new("binance").with_heartbeat_interval(Duration::from_secs(1));
    let (engine, _provider, _transport) = engine_with(config, FakeProvider::new());
    open(&engine, &spot());

    assert!(engine.check_liveness().is_empty());
    tokio::time::advance(Duration::from_secs(2)).await;

    assert_eq!(engine.check_liveness(), vec![spot()]);
    assert_eq!(engine.connection_state(&spot()), Some(ConnectionState::Degraded));
    // Already degraded: not reported twice
    assert!(engine.check_liveness().is_empty());

    engine.handle_message(&spot(), r#"{"result":null,"id":99}"#);
    assert_eq!(engine.connection_state(&spot()), Some(ConnectionState::Open));
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_survives_zero_heartbeat() {
    let config = EngineConfig::new("binance").with_heartbeat_interval(Duration::ZERO);
    let (engine, _provider, _transport) = engine_with(config, FakeProvider::new());
    open(&engine, &spot());

    let watchdog = engine.spawn_watchdog();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!watchdog.is_finished());
    assert_eq!(engine.connection_state(&spot()), Some(ConnectionState::Degraded));
    watchdog.abort();
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_session_expiry_rejects_only_authenticated_topics() {
    let issuer = Arc::new(FakeIssuer::default());
    let (engine, session) = engine_with_session(Arc::clone(&issuer), SessionConfig::default());

    let orders = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.watch_orders(&user(), None).await })
    };
    let trades = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.watch_trades(&spot(), "BTCUSDT").await })
    };
    eventually(|| {
        engine.router().is_active(&Topic::orders().on(&user()))
            && engine.router().is_active(&Topic::trades("BTCUSDT").on(&spot()))
    })
    .await;
    assert_eq!(issuer.issued.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), SessionState::Valid);

    engine.handle_message(&spot(), &trade_frame(1));
    let mut trades = trades.await.unwrap().unwrap();

    engine.handle_message(&user(), r#"{"e":"listenKeyExpired","E":1576653824250}"#);

    let err = orders.await.unwrap().unwrap_err();
    assert!(matches!(err, SyncError::AuthExpired(_)));
    assert_eq!(session.state(), SessionState::Invalidated);
    assert!(!engine.router().is_active(&Topic::orders().on(&user())));

    // Public streams carry on
    engine.handle_message(&spot(), &trade_frame(2));
    assert!(matches!(trades.recv().await, Ok(Update::Trades(_))));

    // Watching again issues a fresh token
    let watcher = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.watch_orders(&user(), None).await })
    };
    eventually(|| engine.router().is_active(&Topic::orders().on(&user()))).await;
    assert_eq!(issuer.issued.load(Ordering::SeqCst), 2);
    engine.handle_message(&user(), &execution_report(1, "NEW", "0", None));
    assert!(watcher.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_failed_renewal_rejects_account_watchers() {
    let issuer = Arc::new(FakeIssuer::default());
    let config = SessionConfig::new(Duration::from_secs(60), Duration::from_secs(10));
    let (engine, session) = engine_with_session(Arc::clone(&issuer), config);
    session.spawn_keepalive();

    let watcher = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.watch_balance(&user(), None).await })
    };
    eventually(|| engine.router().is_active(&Topic::balance_any().on(&user()))).await;
    issuer.failing.store(true, Ordering::SeqCst);

    // The keepalive fires at 50s and fails
    let err = watcher.await.unwrap().unwrap_err();
    assert!(matches!(err, SyncError::AuthExpired(_)));
    assert_eq!(session.state(), SessionState::Invalidated);
    assert_eq!(issuer.extended.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_session_issue_failure_fails_watch() {
    let issuer = Arc::new(FakeIssuer::default());
    issuer.failing.store(true, Ordering::SeqCst);
    let (engine, _session) = engine_with_session(Arc::clone(&issuer), SessionConfig::default());

    let err = engine.watch_orders(&user(), None).await.unwrap_err();
    assert!(matches!(err, SyncError::AuthExpired(_)));
    assert!(engine.router().topics().is_empty());

    // Public topics never touch the session
    engine.handle_message(&spot(), &trade_frame(1));
    let trades = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.watch_trades(&spot(), "BTCUSDT").await })
    };
    eventually(|| engine.router().is_active(&Topic::trades("BTCUSDT").on(&spot()))).await;
    engine.handle_message(&spot(), &trade_frame(2));
    assert!(trades.await.unwrap().is_ok());
    assert_eq!(issuer.issued.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Requests
// ============================================================================

#[tokio::test]
async fn test_request_resolves_with_response() {
    let (engine, _provider, transport) = open_engine(FakeProvider::new());

    let call = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine
                .request(&spot(), "LIST_SUBSCRIPTIONS", json!([]))
                .await
        })
    };
    eventually(|| transport.sent().len() == 1).await;
    let id = transport.last_id().unwrap();

    engine.handle_message(&spot(), &format!(r#"{{"result":["btcusdt@trade"],"id":{}}}"#, id));
    assert_eq!(call.await.unwrap().unwrap(), Some(json!(["btcusdt@trade"])));
    assert!(engine.router().topics().is_empty());
}

#[tokio::test]
async fn test_request_rejected_by_venue() {
    let (engine, _provider, transport) = open_engine(FakeProvider::new());

    let call = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.request(&spot(), "SUBSCRIBE", json!(["nope"])).await })
    };
    eventually(|| transport.sent().len() == 1).await;
    let id = transport.last_id().unwrap();

    engine.handle_message(
        &spot(),
        &format!(r#"{{"code":2,"msg":"Invalid request: unknown stream","id":{}}}"#, id),
    );
    assert_eq!(
        call.await.unwrap().unwrap_err(),
        SyncError::Api {
            code: 2,
            msg: "Invalid request: unknown stream".to_string()
        }
    );
}

#[tokio::test]
async fn test_pending_request_rejected_on_disconnect() {
    let (engine, _provider, transport) = open_engine(FakeProvider::new());

    let call = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.request(&spot(), "LIST_SUBSCRIPTIONS", json!([])).await })
    };
    eventually(|| transport.sent().len() == 1).await;

    engine.on_disconnect(&spot(), "closed by venue");
    assert_eq!(
        call.await.unwrap().unwrap_err(),
        SyncError::TransportLost("closed by venue".to_string())
    );
}
