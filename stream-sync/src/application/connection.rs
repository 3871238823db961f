use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::{ConnectionId, SyncStatus, Topic};

use super::reconstructor::OrderBookReconstructor;

/// Lifecycle of one physical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Open, but silent for longer than the heartbeat interval
    Degraded,
    Closed,
}

impl ConnectionState {
    /// Whether new subscriptions may be placed on the connection
    pub fn accepts_subscriptions(&self) -> bool {
        matches!(self, ConnectionState::Open | ConnectionState::Degraded)
    }
}

/// State owned by one connection's dispatch path
#[derive(Debug)]
pub struct ConnectionContext {
    id: ConnectionId,
    state: ConnectionState,
    /// Books bound to this connection, by symbol
    books: HashMap<String, OrderBookReconstructor>,
    /// Topics whose feed runs over this connection
    topics: HashSet<Topic>,
    last_message: Option<Instant>,
    next_request_id: u64,
    /// Tells this connection apart from earlier ones registered under the same id
    epoch: u64,
}

impl ConnectionContext {
    pub fn new(id: ConnectionId) -> Self {
        ConnectionContext {
            id,
            state: ConnectionState::Connecting,
            books: HashMap::new(),
            topics: HashSet::new(),
            last_message: None,
            next_request_id: 1,
            epoch: 0,
        }
    }

    pub fn with_epoch(mut self, epoch: u64) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn open(&mut self, now: Instant) {
        self.state = ConnectionState::Open;
        self.last_message = Some(now);
    }

    /// Record inbound traffic. Returns true if this restored a degraded connection.
    pub fn on_message(&mut self, now: Instant) -> bool {
        self.last_message = Some(now);
        if self.state == ConnectionState::Degraded {
            self.state = ConnectionState::Open;
            return true;
        }
        false
    }

    /// Returns true if the connection just became degraded
    pub fn check_liveness(&mut self, now: Instant, heartbeat: Duration) -> bool {
        if self.state != ConnectionState::Open {
            return false;
        }
        let silent = self
            .last_message
            .is_none_or(|last| now.saturating_duration_since(last) > heartbeat);
        if silent {
            self.state = ConnectionState::Degraded;
        }
        silent
    }

    /// Close the connection, dropping its books. Returns the topics that were bound to it.
    pub fn close(&mut self) -> Vec<Topic> {
        self.state = ConnectionState::Closed;
        self.books.clear();
        let mut topics: Vec<Topic> = self.topics.drain().collect();
        topics.sort();
        topics
    }

    pub fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    pub fn bind(&mut self, topic: Topic) {
        self.topics.insert(topic);
    }

    pub fn unbind(&mut self, topic: &Topic) -> bool {
        self.topics.remove(topic)
    }

    pub fn is_bound(&self, topic: &Topic) -> bool {
        self.topics.contains(topic)
    }

    /// Bound topics matching `predicate`, removed from the connection
    pub fn unbind_where(&mut self, predicate: impl Fn(&Topic) -> bool) -> Vec<Topic> {
        let matched: Vec<Topic> = self.topics.iter().filter(|t| predicate(t)).cloned().collect();
        for topic in &matched {
            self.topics.remove(topic);
        }
        matched
    }

    pub fn insert_book(&mut self, book: OrderBookReconstructor) {
        self.books.insert(book.symbol().to_string(), book);
    }

    pub fn book(&self, symbol: &str) -> Option<&OrderBookReconstructor> {
        self.books.get(symbol)
    }

    pub fn book_mut(&mut self, symbol: &str) -> Option<&mut OrderBookReconstructor> {
        self.books.get_mut(symbol)
    }

    pub fn remove_book(&mut self, symbol: &str) -> Option<OrderBookReconstructor> {
        self.books.remove(symbol)
    }

    pub fn book_status(&self, symbol: &str) -> SyncStatus {
        self.books
            .get(symbol)
            .map(OrderBookReconstructor::status)
            .unwrap_or(SyncStatus::Uninitialized)
    }
}
