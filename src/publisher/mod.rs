//! Forwarding items to the message broker.
//!
//! * [`Publisher`] is the port the reconciliation loop depends on.
//! * [`ConnectionManager`] implements it on top of any [`Broker`], owning the
//!   single live connection and reconnecting in the background.
//! * [`AmqpBroker`] is the production broker (RabbitMQ via `lapin`).

mod amqp;
mod broker;
mod manager;

pub use amqp::{AmqpBroker, AmqpConfig};
pub use broker::{Broker, BrokerConnection, BrokerError, CloseNotification, Session};
pub use manager::{ConnectionManager, ConnectionState, PublisherConfig};

use async_trait::async_trait;

use crate::source::Item;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The manager has no usable connection right now; try again next cycle.
    #[error("broker connection is not ready ({0:?})")]
    NotConnected(ConnectionState),

    #[error("can't encode item: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("publisher is already initialized")]
    AlreadyInitialized,
}

/// Hands one item to the downstream consumer.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, item: &Item) -> Result<(), PublishError>;
}
