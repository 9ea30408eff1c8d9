//! Broker connection manager.
//!
//! Owns the one live broker connection and keeps it alive:
//!
//! ```text
//!               init()                 dial + declare ok
//! Disconnected ───────► Connecting ─────────────────────► Ready
//!                        ▲      │ dial failed:                │
//!                        │      └─ wait delay, retry ─┐      │ close notification
//!                        │                            │      │ (watchdog)
//!                        └────────────────────────────┴──────┘
//! ```
//!
//! Publishes read the connection cell under a shared lock and fail fast
//! unless it is `Ready`. Transitions take the exclusive lock only to swap the
//! cell; dialing happens outside the lock so a reconnect never stalls
//! publishers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broker::{Broker, BrokerConnection, BrokerError, CloseNotification, Session};
use super::{PublishError, Publisher};
use crate::source::Item;

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Exchange / topic every item is published to.
    pub topic: String,
    /// Pause before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Bound for each connect step (dial, declare) and for one publish.
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
}

enum Slot {
    Disconnected,
    Connecting,
    Ready(Arc<dyn BrokerConnection>),
}

/// The versioned connection cell. `generation` counts installed connections.
struct Cell {
    slot: Slot,
    generation: u64,
}

impl Cell {
    fn state(&self) -> ConnectionState {
        match self.slot {
            Slot::Disconnected => ConnectionState::Disconnected,
            Slot::Connecting => ConnectionState::Connecting,
            Slot::Ready(_) => ConnectionState::Ready,
        }
    }
}

struct Shared<B> {
    broker: B,
    config: PublisherConfig,
    cell: RwLock<Cell>,
    cancel: CancellationToken,
}

/// Thread-safe publisher that reconnects by itself after a connection loss.
pub struct ConnectionManager<B: Broker> {
    shared: Arc<Shared<B>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl<B: Broker> ConnectionManager<B> {
    /// The watchdog stops when `cancel` fires or on [`shutdown`](Self::shutdown).
    pub fn new(broker: B, config: PublisherConfig, cancel: &CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                broker,
                config,
                cell: RwLock::new(Cell {
                    slot: Slot::Disconnected,
                    generation: 0,
                }),
                cancel: cancel.child_token(),
            }),
            watchdog: Mutex::new(None),
        }
    }

    /// Connect synchronously and arm the reconnect watchdog.
    ///
    /// This is the only place a connection failure reaches a caller; later
    /// reconnect failures are logged by the watchdog.
    pub async fn init(&self) -> Result<(), PublishError> {
        let mut watchdog = self.watchdog.lock().await;
        if watchdog.is_some() {
            return Err(PublishError::AlreadyInitialized);
        }

        self.shared.replace(Slot::Connecting).await;
        let session = match self.shared.connect().await {
            Ok(session) => session,
            Err(e) => {
                self.shared.replace(Slot::Disconnected).await;
                return Err(e.into());
            }
        };

        let generation = self.shared.install(session.connection).await;
        info!(generation, topic = %self.shared.config.topic, "connected to broker");

        let shared = Arc::clone(&self.shared);
        *watchdog = Some(tokio::spawn(watch(shared, session.closed)));
        Ok(())
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.cell.read().await.state()
    }

    /// Number of connections installed so far.
    pub async fn generation(&self) -> u64 {
        self.shared.cell.read().await.generation
    }

    /// Stop the watchdog and close the live connection, if any.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();

        if let Some(handle) = self.watchdog.lock().await.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "broker watchdog task failed");
            }
        }

        if let Some(connection) = self.shared.replace(Slot::Disconnected).await {
            close_quietly(connection.as_ref()).await;
        }
        info!("publisher shut down");
    }
}

impl<B: Broker> Shared<B> {
    /// Swap the slot, returning the connection it held if it was `Ready`.
    async fn replace(&self, slot: Slot) -> Option<Arc<dyn BrokerConnection>> {
        let mut cell = self.cell.write().await;
        let previous = std::mem::replace(&mut cell.slot, slot);
        debug!(state = ?cell.state(), generation = cell.generation, "broker connection state changed");
        match previous {
            Slot::Ready(connection) => Some(connection),
            Slot::Disconnected | Slot::Connecting => None,
        }
    }

    async fn install(&self, connection: Arc<dyn BrokerConnection>) -> u64 {
        let mut cell = self.cell.write().await;
        cell.generation += 1;
        cell.slot = Slot::Ready(connection);
        cell.generation
    }

    /// Dial and declare the topic, each step bounded by the configured
    /// timeout. A dialed connection that fails to declare is closed before
    /// returning, since dropping it does not release the socket.
    async fn connect(&self) -> Result<Session, BrokerError> {
        let timeout = self.config.timeout;
        let session = match tokio::time::timeout(timeout, self.broker.dial()).await {
            Ok(result) => result?,
            Err(_) => return Err(BrokerError::Timeout(timeout)),
        };

        let declared =
            match tokio::time::timeout(timeout, session.connection.declare_topic(&self.config.topic)).await {
                Ok(result) => result,
                Err(_) => Err(BrokerError::Timeout(timeout)),
            };
        if let Err(e) = declared {
            if tokio::time::timeout(timeout, close_quietly(session.connection.as_ref()))
                .await
                .is_err()
            {
                warn!(timeout = ?timeout, "gave up closing broker connection after failed declare");
            }
            return Err(e);
        }
        Ok(session)
    }

    /// Retry [`connect`](Self::connect) every `reconnect_delay` until it
    /// succeeds or cancellation fires. Returns the new close notification,
    /// or `None` when giving up.
    async fn reconnect(&self) -> Option<CloseNotification> {
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.replace(Slot::Disconnected).await;
                    info!(attempt, "stopped reconnecting to broker: shutting down");
                    return None;
                }
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }

            match self.connect().await {
                Ok(session) => {
                    let generation = self.install(session.connection).await;
                    info!(attempt, generation, "reconnected to broker");
                    return Some(session.closed);
                }
                Err(e) => warn!(attempt, error = %e, "can't reconnect to broker"),
            }
        }
    }
}

/// Reconnect watchdog: one task for the lifetime of the manager, following
/// each installed connection's close notification in turn.
async fn watch<B: Broker>(shared: Arc<Shared<B>>, mut closed: CloseNotification) {
    loop {
        let reason = tokio::select! {
            _ = shared.cancel.cancelled() => {
                debug!("broker watchdog stopped");
                return;
            }
            reason = &mut closed => reason
                .unwrap_or_else(|_| BrokerError::Closed("close notifier dropped".into())),
        };
        error!(error = %reason, "broker connection lost");

        if let Some(old) = shared.replace(Slot::Connecting).await {
            close_quietly(old.as_ref()).await;
        }

        match shared.reconnect().await {
            Some(next) => closed = next,
            None => return,
        }
    }
}

async fn close_quietly(connection: &dyn BrokerConnection) {
    if connection.is_closed() {
        return;
    }
    if let Err(e) = connection.close().await {
        warn!(error = %e, "can't close broker connection");
    }
}

#[async_trait]
impl<B: Broker> Publisher for ConnectionManager<B> {
    async fn publish(&self, item: &Item) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(item)?;

        let cell = self.shared.cell.read().await;
        let Slot::Ready(connection) = &cell.slot else {
            return Err(PublishError::NotConnected(cell.state()));
        };

        let PublisherConfig { topic, timeout, .. } = &self.shared.config;
        match tokio::time::timeout(*timeout, connection.publish(topic, &payload)).await {
            Ok(result) => result.map_err(PublishError::from),
            Err(_) => Err(BrokerError::Timeout(*timeout).into()),
        }
    }
}
