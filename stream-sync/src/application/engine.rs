//! Synchronization Engine
//!
//! Orchestrates the reconstructors, caches, router and session for every
//! connection of one venue.
//!
//! ```text
//! WsClient ──WsEvent──▶ drive() ──▶ handle_message()
//!                                      │ Normalizer
//!                                      ▼
//!                                 StreamEvent ──▶ OrderBookReconstructor / AccountState
//!                                                          │
//!                                                          ▼
//!                                                 TopicRouter ──▶ Waiter<Update>
//! ```
//!
//! Each connection's messages are handled one at a time under its context
//! lock. Snapshot tasks feed back through the same lock, so a book is only
//! ever mutated by its own connection's dispatch path.
//!
//! Books and connections carry a generation drawn from one engine-wide
//! counter. Snapshot tasks and drivers remember the generation they were
//! started for and drop their results once it has been replaced.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use sync_core::{DepthDelta, DepthSnapshot, Order, Position, Ticker, Trade};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval, timeout};

use crate::domain::{
    ConnectionId, ContinuityPredicate, ControlMessage, Normalizer, SnapshotProvider, StreamEvent,
    SyncError, SyncStatus, Topic, Transport, WsEvent, WsRequest,
};

use super::account::{AccountState, Balances};
use super::config::EngineConfig;
use super::connection::{ConnectionContext, ConnectionState};
use super::reconstructor::{DeltaOutcome, OrderBook, OrderBookReconstructor};
use super::router::{Registration, TopicRouter, Waiter, WaiterKind};
use super::session::SessionManager;

/// Value delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    OrderBook(OrderBook),
    Trades(Vec<Trade>),
    Orders(Vec<Order>),
    MyTrades(Vec<Trade>),
    Positions(Vec<Position>),
    Balance(Balances),
    Ticker(Ticker),
    Response(Option<Value>),
}

pub type Subscription = Waiter<Update>;

type Connections = DashMap<ConnectionId, Arc<Mutex<ConnectionContext>>>;

/// Lower bound on the liveness check period
const MIN_WATCHDOG_PERIOD: Duration = Duration::from_millis(10);

/// Synchronization engine for one venue.
///
/// Generic over:
/// - `P`: SnapshotProvider - for fetching order book snapshots
/// - `T`: Transport - for sending subscribe and request messages
pub struct SyncEngine<P, T>
where
    P: SnapshotProvider + 'static,
    T: Transport + 'static,
{
    config: EngineConfig,
    provider: Arc<P>,
    transport: Arc<T>,
    normalizer: Arc<dyn Normalizer>,
    continuity: Arc<dyn ContinuityPredicate>,
    router: Arc<TopicRouter<Update>>,
    session: Option<Arc<SessionManager>>,
    connections: Arc<Connections>,
    account: Mutex<AccountState>,
    generations: AtomicU64,
}

impl<P, T> SyncEngine<P, T>
where
    P: SnapshotProvider + 'static,
    T: Transport + 'static,
{
    pub fn new(
        config: EngineConfig,
        provider: Arc<P>,
        transport: Arc<T>,
        normalizer: Arc<dyn Normalizer>,
    ) -> Self {
        SyncEngine {
            continuity: Arc::new(config.continuity),
            account: Mutex::new(AccountState::new(&config)),
            config,
            provider,
            transport,
            normalizer,
            router: Arc::new(TopicRouter::new()),
            session: None,
            connections: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Replace the built-in continuity rule with a venue-specific one
    pub fn with_continuity(mut self, continuity: Arc<dyn ContinuityPredicate>) -> Self {
        self.continuity = continuity;
        self
    }

    /// Share a router with other engines. Call before `with_session`.
    pub fn with_router(mut self, router: Arc<TopicRouter<Update>>) -> Self {
        self.router = router;
        self
    }

    /// Attach a session; renewal failures void every authenticated topic
    pub fn with_session(mut self, session: Arc<SessionManager>) -> Self {
        let router = Arc::clone(&self.router);
        let connections = Arc::clone(&self.connections);
        session.on_renewal_failure(move |error| {
            let error = match error {
                SyncError::AuthExpired(_) => error.clone(),
                other => SyncError::AuthExpired(other.to_string()),
            };
            reject_authenticated(&router, &connections, error);
        });
        self.session = Some(session);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<TopicRouter<Update>> {
        &self.router
    }

    pub fn session(&self) -> Option<&Arc<SessionManager>> {
        self.session.as_ref()
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Register a connection in `Connecting` state. An existing live
    /// connection with the same id is closed first.
    pub fn connect(&self, id: ConnectionId) {
        let live = self
            .context(&id)
            .is_ok_and(|ctx| ctx.lock().state() != ConnectionState::Closed);
        if live {
            self.on_disconnect(&id, "replaced by a new connection");
        }
        let ctx = ConnectionContext::new(id.clone()).with_epoch(self.next_generation());
        self.connections.insert(id, Arc::new(Mutex::new(ctx)));
    }

    pub fn on_open(&self, id: &ConnectionId) -> Result<(), SyncError> {
        let ctx = self.context(id)?;
        ctx.lock().open(Instant::now());
        tracing::info!("{} open", id);
        Ok(())
    }

    /// Close the connection: drop its books and reject every topic bound to it
    pub fn on_disconnect(&self, id: &ConnectionId, reason: &str) {
        self.close_connection(id, None, reason);
    }

    /// `epoch` limits the close to the connection a driver was started for
    fn close_connection(&self, id: &ConnectionId, epoch: Option<u64>, reason: &str) {
        let Ok(ctx) = self.context(id) else {
            return;
        };
        let topics = {
            let mut ctx = ctx.lock();
            if epoch.is_some_and(|epoch| epoch != ctx.epoch()) {
                tracing::debug!("{} already replaced, ignoring close: {}", id, reason);
                return;
            }
            if ctx.state() == ConnectionState::Closed {
                return;
            }
            ctx.close()
        };
        tracing::error!("{} closed: {} ({} topics rejected)", id, reason, topics.len());

        let error = SyncError::TransportLost(reason.to_string());
        for topic in topics {
            self.router.reject(&topic, error.clone());
        }
    }

    pub fn connection_state(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.context(id).ok().map(|ctx| ctx.lock().state())
    }

    /// Mark silent connections as degraded. Returns the connections that
    /// just became degraded.
    pub fn check_liveness(&self) -> Vec<ConnectionId> {
        let now = Instant::now();
        let mut degraded = Vec::new();
        for ctx in self.contexts() {
            let mut ctx = ctx.lock();
            if ctx.check_liveness(now, self.config.heartbeat_interval) {
                tracing::warn!(
                    "{} silent for more than {:?}, degraded",
                    ctx.id(),
                    self.config.heartbeat_interval
                );
                degraded.push(ctx.id().clone());
            }
        }
        degraded
    }

    /// Run `check_liveness` on a timer
    pub fn spawn_watchdog(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let period = (engine.config.heartbeat_interval / 2).max(MIN_WATCHDOG_PERIOD);
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                engine.check_liveness();
            }
        })
    }

    /// Feed one connection's transport events into the engine until it closes.
    ///
    /// The driver belongs to the connection registered under `id` at the
    /// time of the call. Once `connect` replaces that connection the driver
    /// stops and leaves the replacement alone.
    pub fn drive(
        self: Arc<Self>,
        id: ConnectionId,
        mut events: mpsc::Receiver<WsEvent>,
    ) -> impl Future<Output = ()> {
        let epoch = self.epoch_of(&id);
        async move {
            while let Some(event) = events.recv().await {
                if epoch.is_some() && self.epoch_of(&id) != epoch {
                    tracing::debug!("{} replaced, stopping its old driver", id);
                    return;
                }
                match event {
                    WsEvent::Message(raw) => self.handle_frame(&id, epoch, &raw),
                    WsEvent::Error(e) => {
                        self.close_connection(&id, epoch, &e);
                        return;
                    }
                    WsEvent::Disconnected => {
                        self.close_connection(&id, epoch, "disconnected");
                        return;
                    }
                }
            }
            self.close_connection(&id, epoch, "event channel closed");
        }
    }

    fn epoch_of(&self, id: &ConnectionId) -> Option<u64> {
        self.context(id).ok().map(|ctx| ctx.lock().epoch())
    }

    fn context(&self, id: &ConnectionId) -> Result<Arc<Mutex<ConnectionContext>>, SyncError> {
        self.connections
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SyncError::UnknownConnection(id.to_string()))
    }

    fn open_context(&self, id: &ConnectionId) -> Result<Arc<Mutex<ConnectionContext>>, SyncError> {
        let ctx = self.context(id)?;
        if !ctx.lock().state().accepts_subscriptions() {
            return Err(SyncError::ConnectionNotOpen(id.to_string()));
        }
        Ok(ctx)
    }

    fn contexts(&self) -> Vec<Arc<Mutex<ConnectionContext>>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    // ========================================================================
    // Watches
    // ========================================================================

    pub async fn watch_order_book(
        self: &Arc<Self>,
        conn: &ConnectionId,
        symbol: &str,
        limit: Option<usize>,
    ) -> Result<Subscription, SyncError> {
        self.watch_order_books(conn, &[symbol], limit).await
    }

    /// Watch several books with one subscription. Suspends until the first
    /// book is synced. `limit` sets the view depth of books this call opens.
    pub async fn watch_order_books(
        self: &Arc<Self>,
        conn: &ConnectionId,
        symbols: &[&str],
        limit: Option<usize>,
    ) -> Result<Subscription, SyncError> {
        let ctx = self.open_context(conn)?;
        let topics = symbols
            .iter()
            .map(|symbol| Topic::order_book(symbol).on(conn))
            .collect();
        let Registration { mut waiter, opened } =
            self.router.subscribe_any(topics, WaiterKind::Repeating);

        let depth = limit.unwrap_or(self.config.order_book_depth as usize);
        for topic in &opened {
            let Some(symbol) = topic.scope().map(str::to_string) else {
                continue;
            };
            let generation = self.next_generation();
            {
                let mut ctx = ctx.lock();
                let book = OrderBookReconstructor::new(
                    &symbol,
                    Arc::clone(&self.continuity),
                    self.config.max_pending_deltas,
                )
                .with_depth_limit(depth)
                .with_generation(generation);
                ctx.insert_book(book);
                ctx.bind(topic.clone());
            }
            if let Err(e) = self.start_feed(&ctx, conn, topic).await {
                self.fail_topic(&ctx, topic, e.clone());
                return Err(e);
            }
            self.spawn_snapshot(conn.clone(), symbol, generation);
        }

        waiter.recv().await?;
        Ok(waiter)
    }

    pub async fn watch_trades(
        &self,
        conn: &ConnectionId,
        symbol: &str,
    ) -> Result<Subscription, SyncError> {
        self.watch(conn, vec![Topic::trades(symbol)]).await
    }

    pub async fn watch_ticker(
        &self,
        conn: &ConnectionId,
        symbol: &str,
    ) -> Result<Subscription, SyncError> {
        self.watch(conn, vec![Topic::ticker(symbol)]).await
    }

    /// One subscription resolved by a ticker of any of `symbols`
    pub async fn watch_tickers(
        &self,
        conn: &ConnectionId,
        symbols: &[&str],
    ) -> Result<Subscription, SyncError> {
        let topics = symbols.iter().map(|symbol| Topic::ticker(symbol)).collect();
        self.watch(conn, topics).await
    }

    pub async fn watch_orders(
        &self,
        conn: &ConnectionId,
        symbol: Option<&str>,
    ) -> Result<Subscription, SyncError> {
        let topic = symbol.map_or_else(Topic::orders, Topic::orders_for);
        self.watch(conn, vec![topic]).await
    }

    pub async fn watch_my_trades(
        &self,
        conn: &ConnectionId,
        symbol: Option<&str>,
    ) -> Result<Subscription, SyncError> {
        let topic = symbol.map_or_else(Topic::my_trades, Topic::my_trades_for);
        self.watch(conn, vec![topic]).await
    }

    pub async fn watch_positions(
        &self,
        conn: &ConnectionId,
        symbol: Option<&str>,
    ) -> Result<Subscription, SyncError> {
        let topic = symbol.map_or_else(Topic::positions, Topic::positions_for);
        self.watch(conn, vec![topic]).await
    }

    /// Balance of one account type, or of any when `account_type` is `None`
    pub async fn watch_balance(
        &self,
        conn: &ConnectionId,
        account_type: Option<&str>,
    ) -> Result<Subscription, SyncError> {
        let topic = account_type.map_or_else(Topic::balance_any, Topic::balance);
        self.watch(conn, vec![topic]).await
    }

    async fn watch(&self, conn: &ConnectionId, topics: Vec<Topic>) -> Result<Subscription, SyncError> {
        let ctx = self.open_context(conn)?;
        if topics.iter().any(Topic::is_authenticated)
            && let Some(session) = &self.session
        {
            session.ensure_valid().await?;
        }

        let topics = topics.iter().map(|topic| topic.on(conn)).collect();
        let Registration { mut waiter, opened } =
            self.router.subscribe_any(topics, WaiterKind::Repeating);
        for topic in &opened {
            ctx.lock().bind(topic.clone());
            if let Err(e) = self.start_feed(&ctx, conn, topic).await {
                self.fail_topic(&ctx, topic, e.clone());
                return Err(e);
            }
        }

        waiter.recv().await?;
        Ok(waiter)
    }

    /// Drop a subscription. Feeds left without consumers are torn down.
    pub async fn unwatch(&self, conn: &ConnectionId, subscription: Subscription) -> Result<(), SyncError> {
        let closed = self.router.unsubscribe(subscription.id());
        let Ok(ctx) = self.context(conn) else {
            return Ok(());
        };
        for request in self.release(&ctx, &closed) {
            self.transport.send(conn, request).await?;
        }
        Ok(())
    }

    /// Unbind topics that lost their last waiter and drop their books.
    /// Returns the unsubscribe requests for the feeds behind them.
    fn release(&self, ctx: &Mutex<ConnectionContext>, topics: &[Topic]) -> Vec<WsRequest> {
        let mut ctx = ctx.lock();
        let accepting = ctx.state().accepts_subscriptions();
        let mut requests = Vec::new();
        for topic in topics {
            if !ctx.unbind(topic) {
                continue;
            }
            if topic.is_order_book()
                && let Some(symbol) = topic.scope()
            {
                ctx.remove_book(symbol);
            }
            if accepting && let Some(stream) = self.normalizer.stream_name(topic) {
                let id = ctx.next_request_id();
                requests.push(WsRequest::unsubscribe(id, vec![stream]));
            }
        }
        requests
    }

    /// Tear down feeds whose subscriptions were dropped without `unwatch`
    fn release_pruned(&self, ctx: &Mutex<ConnectionContext>, conn: &ConnectionId) {
        let topics = self.router.drain_released(|topic| topic.is_on(conn));
        if topics.is_empty() {
            return;
        }
        tracing::debug!("{} releasing abandoned topics {:?}", conn, topics);
        let requests = self.release(ctx, &topics);
        if requests.is_empty() {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let conn = conn.clone();
        tokio::spawn(async move {
            for request in requests {
                if let Err(e) = transport.send(&conn, request).await {
                    tracing::warn!("{} failed to unsubscribe: {}", conn, e);
                }
            }
        });
    }

    async fn start_feed(
        &self,
        ctx: &Mutex<ConnectionContext>,
        conn: &ConnectionId,
        topic: &Topic,
    ) -> Result<(), SyncError> {
        let Some(stream) = self.normalizer.stream_name(topic) else {
            return Ok(());
        };
        let id = ctx.lock().next_request_id();
        tracing::debug!("{} subscribing {}", conn, stream);
        self.transport
            .send(conn, WsRequest::subscribe(id, vec![stream]))
            .await?;
        Ok(())
    }

    fn fail_topic(&self, ctx: &Mutex<ConnectionContext>, topic: &Topic, error: SyncError) {
        let mut ctx = ctx.lock();
        self.discard(&mut ctx, topic, error);
    }

    /// Unbind a topic, dropping its book, and reject its waiters. Other
    /// topics left without waiters as a result are unbound as well.
    fn discard(&self, ctx: &mut ConnectionContext, topic: &Topic, error: SyncError) {
        let mut released = self.router.reject(topic, error);
        if !released.contains(topic) {
            released.push(topic.clone());
        }
        for topic in released {
            ctx.unbind(&topic);
            if topic.is_order_book()
                && let Some(symbol) = topic.scope()
            {
                ctx.remove_book(symbol);
            }
        }
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Send a request and wait for the venue's response
    pub async fn request(
        &self,
        conn: &ConnectionId,
        method: &str,
        params: Value,
    ) -> Result<Option<Value>, SyncError> {
        let ctx = self.open_context(conn)?;
        let id = ctx.lock().next_request_id();
        let topic = Topic::request(id).on(conn);
        let Registration { mut waiter, .. } =
            self.router.subscribe(topic.clone(), WaiterKind::OneShot);
        ctx.lock().bind(topic.clone());

        if let Err(e) = self
            .transport
            .send(conn, WsRequest::call(id, method, params))
            .await
        {
            let error = SyncError::from(e);
            self.fail_topic(&ctx, &topic, error.clone());
            return Err(error);
        }

        let reply = waiter.recv().await;
        ctx.lock().unbind(&topic);
        match reply? {
            Update::Response(result) => Ok(result),
            other => Err(SyncError::Malformed(format!(
                "unexpected reply to request {}: {:?}",
                id, other
            ))),
        }
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    fn spawn_snapshot(self: &Arc<Self>, conn: ConnectionId, symbol: String, generation: u64) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let depth = engine.config.order_book_depth;
            let result = match timeout(
                engine.config.snapshot_timeout,
                engine.provider.fetch_snapshot(&symbol, Some(depth)),
            )
            .await
            {
                Ok(Ok(snapshot)) => Ok(snapshot),
                Ok(Err(e)) => Err(SyncError::Snapshot(e)),
                Err(_) => Err(SyncError::Timeout(format!(
                    "snapshot for {} exceeded {:?}",
                    symbol, engine.config.snapshot_timeout
                ))),
            };
            engine.on_snapshot(&conn, &symbol, generation, result);
        });
    }

    /// Apply a fetched snapshot, provided the book it was fetched for is still live
    fn on_snapshot(
        &self,
        conn: &ConnectionId,
        symbol: &str,
        generation: u64,
        result: Result<DepthSnapshot, SyncError>,
    ) {
        let Ok(ctx) = self.context(conn) else {
            return;
        };
        {
            let mut ctx = ctx.lock();
            let topic = Topic::order_book(symbol).on(conn);
            let symbol = symbol.to_uppercase();
            let Some(book) = ctx.book_mut(&symbol) else {
                tracing::debug!("{} {} book dropped before its snapshot arrived", conn, symbol);
                return;
            };
            if book.generation() != generation {
                tracing::debug!(
                    "{} {} snapshot fetched for a discarded book, ignored",
                    conn,
                    symbol
                );
                return;
            }

            match result.and_then(|snapshot| book.apply_snapshot(snapshot)) {
                Ok(replayed) => {
                    tracing::info!(
                        "{} {} synced ({} buffered deltas replayed)",
                        conn,
                        symbol,
                        replayed
                    );
                    let view = book.view();
                    self.router.resolve(&topic, Update::OrderBook(view));
                }
                Err(e) => {
                    tracing::warn!("{} {} failed to sync: {}", conn, symbol, e);
                    self.discard(&mut ctx, &topic, e);
                }
            }
        }
        self.release_pruned(&ctx, conn);
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Process one inbound text frame
    pub fn handle_message(&self, conn: &ConnectionId, raw: &str) {
        self.handle_frame(conn, None, raw);
    }

    /// `epoch` limits the frame to the connection a driver was started for
    fn handle_frame(&self, conn: &ConnectionId, epoch: Option<u64>, raw: &str) {
        let Ok(ctx) = self.context(conn) else {
            tracing::debug!("message for unknown connection {}", conn);
            return;
        };
        let events = match self.normalizer.normalize(raw) {
            Ok(events) => events,
            Err(e) => {
                tracing::debug!("{} ignoring message: {}", conn, e);
                return;
            }
        };

        let mut session_expired = false;
        {
            let mut ctx = ctx.lock();
            if ctx.state() == ConnectionState::Closed
                || epoch.is_some_and(|epoch| epoch != ctx.epoch())
            {
                return;
            }
            if ctx.on_message(Instant::now()) {
                tracing::info!("{} recovered", conn);
            }
            for event in events {
                match event {
                    StreamEvent::Control(ControlMessage::SessionExpired) => session_expired = true,
                    event => self.dispatch(&mut ctx, event),
                }
            }
        }

        // Teardown and failure handlers take context locks themselves
        self.release_pruned(&ctx, conn);
        if session_expired {
            self.expire_session();
        }
    }

    fn dispatch(&self, ctx: &mut ConnectionContext, event: StreamEvent) {
        let conn = ctx.id().clone();
        match event {
            StreamEvent::OrderBookDelta(delta) => self.on_delta(ctx, delta),
            StreamEvent::Trade(trade) => {
                let topic = Topic::trades(&trade.symbol).on(&conn);
                let tape = self.account.lock().record_trade(trade);
                self.router.resolve(&topic, Update::Trades(tape));
            }
            StreamEvent::OrderUpdate { order, execution } => {
                let symbol = order.symbol.clone();
                let filled = execution.is_some();
                self.account.lock().apply_order(order, execution);

                self.publish(Topic::orders().on(&conn), || {
                    Update::Orders(self.account.lock().orders())
                });
                self.publish(Topic::orders_for(&symbol).on(&conn), || {
                    Update::Orders(self.account.lock().orders_for(&symbol))
                });
                if filled {
                    self.publish(Topic::my_trades().on(&conn), || {
                        Update::MyTrades(self.account.lock().my_trades())
                    });
                    self.publish(Topic::my_trades_for(&symbol).on(&conn), || {
                        Update::MyTrades(self.account.lock().my_trades_for(&symbol))
                    });
                }
            }
            StreamEvent::PositionUpdate(positions) => {
                let mut symbols: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
                symbols.sort();
                symbols.dedup();
                self.account.lock().apply_positions(positions);

                self.publish(Topic::positions().on(&conn), || {
                    Update::Positions(self.account.lock().positions())
                });
                for symbol in symbols {
                    self.publish(Topic::positions_for(&symbol).on(&conn), || {
                        Update::Positions(self.account.lock().positions_for(&symbol))
                    });
                }
            }
            StreamEvent::BalanceUpdate(update) => {
                let (account_type, balances) = self.account.lock().apply_balance(update);
                let topics = [
                    Topic::balance(&account_type).on(&conn),
                    Topic::balance_any().on(&conn),
                ];
                self.router.resolve_many(&topics, Update::Balance(balances));
            }
            StreamEvent::Ticker(ticker) => {
                let topic = Topic::ticker(&ticker.symbol).on(&conn);
                self.account.lock().set_ticker(ticker.clone());
                self.router.resolve(&topic, Update::Ticker(ticker));
            }
            StreamEvent::Control(control) => self.on_control(&conn, control),
        }
    }

    fn on_delta(&self, ctx: &mut ConnectionContext, delta: DepthDelta) {
        let conn = ctx.id().clone();
        let symbol = delta.symbol.to_uppercase();
        let topic = Topic::order_book(&symbol).on(&conn);
        let Some(book) = ctx.book_mut(&symbol) else {
            tracing::trace!("{} no book for {}, delta ignored", conn, symbol);
            return;
        };

        match book.apply_delta(delta) {
            Ok(DeltaOutcome::Applied) => {
                let view = book.view();
                self.router.resolve(&topic, Update::OrderBook(view));
            }
            Ok(DeltaOutcome::Buffered) => {
                tracing::debug!(
                    "{} {} delta buffered ({} pending)",
                    conn,
                    symbol,
                    book.state().pending_len()
                );
            }
            Ok(DeltaOutcome::Stale) => {}
            Err(e) => {
                tracing::warn!("{} {}, discarding book", conn, e);
                self.discard(ctx, &topic, e);
            }
        }
    }

    fn on_control(&self, conn: &ConnectionId, control: ControlMessage) {
        match control {
            ControlMessage::Response { id, result } => {
                self.router
                    .resolve(&Topic::request(id).on(conn), Update::Response(result));
            }
            ControlMessage::ApiError {
                id: Some(id),
                code,
                msg,
            } => {
                tracing::warn!("{} request {} failed: {} {}", conn, id, code, msg);
                self.router
                    .reject(&Topic::request(id).on(conn), SyncError::Api { code, msg });
            }
            ControlMessage::ApiError { id: None, code, msg } => {
                tracing::warn!("{} venue error: {} {}", conn, code, msg);
            }
            // Handled by handle_message once the context lock is released
            ControlMessage::SessionExpired => {}
        }
    }

    /// Resolve `topic` only if someone is listening, building the value lazily
    fn publish(&self, topic: Topic, value: impl FnOnce() -> Update) {
        if self.router.is_active(&topic) {
            self.router.resolve(&topic, value());
        }
    }

    fn expire_session(&self) {
        let error = SyncError::AuthExpired("venue revoked the session token".to_string());
        match &self.session {
            Some(session) => session.invalidate(error),
            None => reject_authenticated(&self.router, &self.connections, error),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn book_status(&self, conn: &ConnectionId, symbol: &str) -> SyncStatus {
        self.context(conn)
            .map(|ctx| ctx.lock().book_status(&symbol.to_uppercase()))
            .unwrap_or(SyncStatus::Uninitialized)
    }

    pub fn order_book(&self, conn: &ConnectionId, symbol: &str) -> Option<OrderBook> {
        let ctx = self.context(conn).ok()?;
        let ctx = ctx.lock();
        let book = ctx.book(&symbol.to_uppercase())?;
        book.status().is_ready().then(|| book.view())
    }

    pub fn trades(&self, symbol: &str) -> Vec<Trade> {
        self.account.lock().trades(&symbol.to_uppercase())
    }

    pub fn orders(&self) -> Vec<Order> {
        self.account.lock().orders()
    }

    pub fn my_trades(&self) -> Vec<Trade> {
        self.account.lock().my_trades()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.account.lock().positions()
    }

    pub fn balances(&self, account_type: &str) -> Balances {
        self.account.lock().balances(account_type)
    }

    pub fn ticker(&self, symbol: &str) -> Option<Ticker> {
        self.account.lock().ticker(&symbol.to_uppercase()).cloned()
    }
}

/// Reject every authenticated topic on every connection
fn reject_authenticated(router: &TopicRouter<Update>, connections: &Connections, error: SyncError) {
    let contexts: Vec<Arc<Mutex<ConnectionContext>>> = connections
        .iter()
        .map(|entry| Arc::clone(entry.value()))
        .collect();
    for ctx in contexts {
        let topics = ctx.lock().unbind_where(Topic::is_authenticated);
        for topic in topics {
            router.reject(&topic, error.clone());
        }
    }
}
