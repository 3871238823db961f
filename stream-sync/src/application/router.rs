//! Topic Router
//!
//! Waiter table shared by every connection. A waiter is registered on one
//! or more topics and is either one-shot (request/response) or repeating
//! (watch streams). A topic is live for as long as it has at least one
//! waiter; the engine uses the opened/closed topic lists returned here to
//! start and tear down the venue feed behind it. Topics closed by pruning
//! dropped handles are kept until the engine drains them.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};

use crate::domain::{SyncError, Topic};

pub type WaiterId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterKind {
    /// Removed after its first resolution or rejection
    OneShot,
    /// Receives every resolution until unsubscribed or rejected
    Repeating,
}

/// Latest state published to a repeating waiter
#[derive(Debug, Clone)]
pub enum Resolution<V> {
    Pending,
    Ready(V),
    Failed(SyncError),
}

enum Sink<V> {
    OneShot(oneshot::Sender<Result<V, SyncError>>),
    Repeating(watch::Sender<Resolution<V>>),
}

impl<V> Sink<V> {
    fn fail(self, error: SyncError) {
        match self {
            Sink::OneShot(tx) => {
                let _ = tx.send(Err(error));
            }
            Sink::Repeating(tx) => {
                tx.send_replace(Resolution::Failed(error));
            }
        }
    }
}

struct Entry<V> {
    topics: Vec<Topic>,
    sink: Sink<V>,
}

enum Receiver<V> {
    OneShot(Option<oneshot::Receiver<Result<V, SyncError>>>),
    Repeating(watch::Receiver<Resolution<V>>),
}

/// Consumer handle for a registered waiter
///
/// Dropping the handle does not unregister the waiter right away; the
/// router prunes it on the next resolution of its topics and reports the
/// topics that closed through [`TopicRouter::drain_released`].
pub struct Waiter<V> {
    id: WaiterId,
    topics: Vec<Topic>,
    rx: Receiver<V>,
}

impl<V: Clone> Waiter<V> {
    pub fn id(&self) -> WaiterId {
        self.id
    }

    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn kind(&self) -> WaiterKind {
        match self.rx {
            Receiver::OneShot(_) => WaiterKind::OneShot,
            Receiver::Repeating(_) => WaiterKind::Repeating,
        }
    }

    /// Wait for the next resolution.
    ///
    /// A one-shot waiter yields once; later calls return `Unsubscribed`.
    /// A repeating waiter yields each new value. Values published while the
    /// consumer was busy are coalesced to the latest one.
    pub async fn recv(&mut self) -> Result<V, SyncError> {
        match &mut self.rx {
            Receiver::OneShot(slot) => {
                let rx = slot.take().ok_or(SyncError::Unsubscribed)?;
                rx.await.unwrap_or(Err(SyncError::Unsubscribed))
            }
            Receiver::Repeating(rx) => loop {
                rx.changed().await.map_err(|_| SyncError::Unsubscribed)?;
                match &*rx.borrow_and_update() {
                    Resolution::Ready(value) => return Ok(value.clone()),
                    Resolution::Failed(error) => return Err(error.clone()),
                    Resolution::Pending => continue,
                }
            },
        }
    }

    /// Latest value without waiting. `None` before the first resolution
    /// and always for one-shot waiters.
    pub fn latest(&self) -> Option<Result<V, SyncError>> {
        match &self.rx {
            Receiver::OneShot(_) => None,
            Receiver::Repeating(rx) => match &*rx.borrow() {
                Resolution::Pending => None,
                Resolution::Ready(value) => Some(Ok(value.clone())),
                Resolution::Failed(error) => Some(Err(error.clone())),
            },
        }
    }
}

impl<V: Clone> std::fmt::Debug for Waiter<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("id", &self.id)
            .field("topics", &self.topics)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Result of a registration
pub struct Registration<V> {
    pub waiter: Waiter<V>,
    /// Topics that had no waiter before this registration
    pub opened: Vec<Topic>,
}

struct RouterState<V> {
    next_id: WaiterId,
    waiters: HashMap<WaiterId, Entry<V>>,
    /// Waiters per topic in registration order
    by_topic: HashMap<Topic, Vec<WaiterId>>,
    /// Topics closed by pruning, not yet drained
    released: Vec<Topic>,
}

impl<V: Clone> RouterState<V> {
    /// Remove a waiter from every topic it is registered on. Topics left
    /// without waiters are appended to `closed`.
    fn detach(&mut self, id: WaiterId, closed: &mut Vec<Topic>) -> Option<Sink<V>> {
        let entry = self.waiters.remove(&id)?;
        for topic in entry.topics {
            if let Some(ids) = self.by_topic.get_mut(&topic) {
                ids.retain(|w| *w != id);
                if ids.is_empty() {
                    self.by_topic.remove(&topic);
                    if !closed.contains(&topic) {
                        closed.push(topic);
                    }
                }
            }
        }
        Some(entry.sink)
    }

    fn waiters_on<'a>(&self, topics: impl Iterator<Item = &'a Topic>) -> Vec<WaiterId> {
        let mut ids: Vec<WaiterId> = Vec::new();
        for topic in topics {
            for id in self.by_topic.get(topic).into_iter().flatten() {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
        }
        ids
    }

    fn deliver(&mut self, ids: Vec<WaiterId>, value: &V) -> usize {
        let mut delivered = 0;
        let mut answered = Vec::new();
        let mut pruned = Vec::new();
        for id in ids {
            match self.waiters.get(&id).map(|e| &e.sink) {
                Some(Sink::Repeating(tx)) if !tx.is_closed() => {
                    tx.send_replace(Resolution::Ready(value.clone()));
                    delivered += 1;
                }
                // Handle dropped without unsubscribing
                Some(Sink::Repeating(_)) => {
                    self.detach(id, &mut pruned);
                }
                // One-shot waiters leave after their first value
                Some(Sink::OneShot(_)) => {
                    if let Some(Sink::OneShot(tx)) = self.detach(id, &mut answered)
                        && tx.send(Ok(value.clone())).is_ok()
                    {
                        delivered += 1;
                    }
                }
                None => {}
            }
        }
        if !pruned.is_empty() {
            tracing::debug!("pruned waiters closed topics {:?}", pruned);
            for topic in pruned {
                if !self.released.contains(&topic) {
                    self.released.push(topic);
                }
            }
        }
        delivered
    }

    fn fail(&mut self, ids: Vec<WaiterId>, error: &SyncError, closed: &mut Vec<Topic>) -> usize {
        let mut failed = 0;
        for id in ids {
            if let Some(sink) = self.detach(id, closed) {
                sink.fail(error.clone());
                failed += 1;
            }
        }
        failed
    }
}

/// Concurrent waiter table
pub struct TopicRouter<V> {
    state: Mutex<RouterState<V>>,
}

impl<V: Clone + Send + Sync + 'static> TopicRouter<V> {
    pub fn new() -> Self {
        TopicRouter {
            state: Mutex::new(RouterState {
                next_id: 1,
                waiters: HashMap::new(),
                by_topic: HashMap::new(),
                released: Vec::new(),
            }),
        }
    }

    pub fn subscribe(&self, topic: Topic, kind: WaiterKind) -> Registration<V> {
        self.subscribe_any(vec![topic], kind)
    }

    /// Register one waiter on several topics; a resolution of any of them
    /// resolves it.
    pub fn subscribe_any(&self, topics: Vec<Topic>, kind: WaiterKind) -> Registration<V> {
        let mut unique: Vec<Topic> = Vec::with_capacity(topics.len());
        for topic in topics {
            if !unique.contains(&topic) {
                unique.push(topic);
            }
        }
        let topics = unique;
        let (sink, rx) = match kind {
            WaiterKind::OneShot => {
                let (tx, rx) = oneshot::channel();
                (Sink::OneShot(tx), Receiver::OneShot(Some(rx)))
            }
            WaiterKind::Repeating => {
                let (tx, rx) = watch::channel(Resolution::Pending);
                (Sink::Repeating(tx), Receiver::Repeating(rx))
            }
        };

        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        let mut opened = Vec::new();
        for topic in &topics {
            let ids = state.by_topic.entry(topic.clone()).or_default();
            if ids.is_empty() {
                opened.push(topic.clone());
            }
            ids.push(id);
        }
        state.waiters.insert(
            id,
            Entry {
                topics: topics.clone(),
                sink,
            },
        );

        Registration {
            waiter: Waiter { id, topics, rx },
            opened,
        }
    }

    /// Deliver `value` to every waiter on `topic`. Returns the number of waiters reached.
    pub fn resolve(&self, topic: &Topic, value: V) -> usize {
        self.resolve_many(std::slice::from_ref(topic), value)
    }

    /// Deliver `value` to the waiters of several topics. A waiter registered
    /// on more than one of them is resolved once.
    pub fn resolve_many(&self, topics: &[Topic], value: V) -> usize {
        let mut state = self.state.lock();
        let ids = state.waiters_on(topics.iter());
        state.deliver(ids, &value)
    }

    /// Fail and remove every waiter on `topic`. Returns the topics left
    /// without waiters, which includes `topic` itself when it had any.
    pub fn reject(&self, topic: &Topic, error: SyncError) -> Vec<Topic> {
        self.reject_where(|t| t == topic, error)
    }

    pub fn reject_where(&self, matches: impl Fn(&Topic) -> bool, error: SyncError) -> Vec<Topic> {
        let mut state = self.state.lock();
        let topics: Vec<Topic> = state.by_topic.keys().filter(|t| matches(t)).cloned().collect();
        let ids = state.waiters_on(topics.iter());
        let mut closed = Vec::new();
        let failed = state.fail(ids, &error, &mut closed);
        if failed > 0 {
            tracing::debug!("rejected {} waiters on {:?}: {}", failed, topics, error);
        }
        closed
    }

    /// Remove one waiter. Its handle observes `Unsubscribed`. Returns the
    /// topics left without waiters.
    pub fn unsubscribe(&self, id: WaiterId) -> Vec<Topic> {
        let mut closed = Vec::new();
        self.state.lock().detach(id, &mut closed);
        closed
    }

    /// Take the topics matching `matches` that pruning closed and that
    /// have not been reopened since.
    pub fn drain_released(&self, matches: impl Fn(&Topic) -> bool) -> Vec<Topic> {
        let mut state = self.state.lock();
        let RouterState {
            by_topic, released, ..
        } = &mut *state;
        let mut drained = Vec::new();
        released.retain(|topic| {
            if !matches(topic) {
                return true;
            }
            if !by_topic.contains_key(topic) {
                drained.push(topic.clone());
            }
            false
        });
        drained
    }

    pub fn waiter_count(&self, topic: &Topic) -> usize {
        self.state.lock().by_topic.get(topic).map_or(0, Vec::len)
    }

    pub fn is_active(&self, topic: &Topic) -> bool {
        self.waiter_count(topic) > 0
    }

    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.state.lock().by_topic.keys().cloned().collect();
        topics.sort();
        topics
    }
}

impl<V: Clone + Send + Sync + 'static> Default for TopicRouter<V> {
    fn default() -> Self {
        Self::new()
    }
}
