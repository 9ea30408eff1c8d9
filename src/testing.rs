//! Scripted fakes shared by the unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;

use crate::publisher::{
    Broker, BrokerConnection, BrokerError, ConnectionState, PublishError, Publisher, Session,
};
use crate::source::{Item, Source, SourceError};

/// Shorthand constructor: `item("/a", "2024-01-01")`.
pub fn item(url: &str, date: &str) -> Item {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap();
    Item {
        title: format!("Post {url}"),
        published_at: Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap()),
        author: "Gopher".to_string(),
        summary: String::new(),
        url: url.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

pub struct ScriptedSource {
    items: Mutex<Vec<Item>>,
    failures: AtomicUsize,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(items: Vec<Item>) -> Self {
        Self {
            items: Mutex::new(items),
            failures: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn current(&self) -> Vec<Item> {
        self.items.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Source for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn fetch(&self, _timeout: Duration) -> Result<Vec<Item>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
            return Err(SourceError::Parse {
                url: "scripted".into(),
                reason: "injected failure".into(),
            });
        }
        Ok(self.current())
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    cancel_after: Mutex<Option<CancellationToken>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Urls published so far, in call order.
    pub fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }

    pub fn fail_for(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Cancel `token` right after the next successful publish.
    pub fn cancel_after_publish(&self, token: CancellationToken) {
        *self.cancel_after.lock().unwrap() = Some(token);
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, item: &Item) -> Result<(), PublishError> {
        if self.failing.lock().unwrap().contains(&item.url) {
            return Err(PublishError::NotConnected(ConnectionState::Connecting));
        }
        self.published.lock().unwrap().push(item.url.clone());
        if let Some(token) = self.cancel_after.lock().unwrap().take() {
            token.cancel();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BrokerState {
    dials: AtomicUsize,
    failures: AtomicUsize,
    stalls: AtomicUsize,
    held: AtomicBool,
    release: Notify,
    connections: Mutex<Vec<Arc<FakeConnection>>>,
}

/// In-memory broker whose dials can be failed or held, and whose
/// connections can be dropped on demand.
#[derive(Clone, Default)]
pub struct FakeBroker {
    state: Arc<BrokerState>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dials(&self) -> usize {
        self.state.dials.load(Ordering::SeqCst)
    }

    pub fn fail_next_dials(&self, n: usize) {
        self.state.failures.store(n, Ordering::SeqCst);
    }

    /// The next `n` dialed connections never finish declaring a topic.
    pub fn stall_next_declares(&self, n: usize) {
        self.state.stalls.store(n, Ordering::SeqCst);
    }

    /// Block dials (after counting them) until [`release_dials`](Self::release_dials).
    pub fn hold_dials(&self) {
        self.state.held.store(true, Ordering::SeqCst);
    }

    pub fn release_dials(&self) {
        self.state.held.store(false, Ordering::SeqCst);
        self.state.release.notify_waiters();
    }

    pub fn latest(&self) -> Arc<FakeConnection> {
        self.state.connections.lock().unwrap().last().cloned().expect("no connection dialed yet")
    }

    /// Every dialed connection, oldest first.
    pub fn connections(&self) -> Vec<Arc<FakeConnection>> {
        self.state.connections.lock().unwrap().clone()
    }

    /// Topics declared, across all connections.
    pub fn declared(&self) -> Vec<String> {
        let connections = self.state.connections.lock().unwrap();
        connections.iter().flat_map(|c| c.declared.lock().unwrap().clone()).collect()
    }

    /// `(topic, payload)` pairs, across all connections.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        let connections = self.state.connections.lock().unwrap();
        connections.iter().flat_map(|c| c.published.lock().unwrap().clone()).collect()
    }

    pub fn published_on_latest(&self) -> usize {
        self.latest().published.lock().unwrap().len()
    }

    /// The connection dies: it reports closed and fires its notification.
    pub fn sever(&self) {
        let connection = self.latest();
        connection.closed.store(true, Ordering::SeqCst);
        connection.notify("severed");
    }

    /// Fire the close notification while the connection still looks open.
    pub fn signal_close(&self) {
        self.latest().notify("channel closed by peer");
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn dial(&self) -> Result<Session, BrokerError> {
        self.state.dials.fetch_add(1, Ordering::SeqCst);

        loop {
            let released = self.state.release.notified();
            if !self.state.held.load(Ordering::SeqCst) {
                break;
            }
            released.await;
        }

        if self.state.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
            return Err(BrokerError::Connect("injected dial failure".into()));
        }

        let stall_declare =
            self.state.stalls.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();

        let (tx, closed) = oneshot::channel();
        let connection = Arc::new(FakeConnection {
            stall_declare,
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
            notifier: Mutex::new(Some(tx)),
            declared: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        });
        self.state.connections.lock().unwrap().push(Arc::clone(&connection));

        Ok(Session { connection, closed })
    }
}

pub struct FakeConnection {
    stall_declare: bool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
    notifier: Mutex<Option<oneshot::Sender<BrokerError>>>,
    declared: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakeConnection {
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn notify(&self, reason: &str) {
        if let Some(tx) = self.notifier.lock().unwrap().take() {
            let _ = tx.send(BrokerError::Closed(reason.to_string()));
        }
    }
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    async fn declare_topic(&self, topic: &str) -> Result<(), BrokerError> {
        if self.stall_declare {
            std::future::pending::<()>().await;
        }
        self.declared.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        if self.is_closed() {
            return Err(BrokerError::Closed("publish on closed connection".into()));
        }
        self.published.lock().unwrap().push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
