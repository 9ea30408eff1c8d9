//! The seam between the connection manager and a concrete broker client.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    #[error("can't connect to broker: {0}")]
    Connect(String),

    #[error("can't declare topic {topic}: {reason}")]
    Declare { topic: String, reason: String },

    #[error("can't publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Fires once when the connection it was issued with becomes unusable.
///
/// A dropped sender counts as a close too.
pub type CloseNotification = oneshot::Receiver<BrokerError>;

/// A freshly dialed connection together with its close notification.
pub struct Session {
    pub connection: Arc<dyn BrokerConnection>,
    pub closed: CloseNotification,
}

/// Dials new connections. One implementation per broker technology.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn dial(&self) -> Result<Session, BrokerError>;
}

/// One live connection (and whatever channel it publishes on).
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Declare `topic`. Idempotent; called on every (re)connect.
    async fn declare_topic(&self, topic: &str) -> Result<(), BrokerError>;

    /// Publish `payload` durably to `topic`.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;

    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<(), BrokerError>;
}
