//! RabbitMQ broker over AMQP 0-9-1 ([`lapin`]).
//!
//! Items go to a durable fanout exchange as persistent messages. The close
//! notification fires on the first connection error lapin reports, or when a
//! publish finds the channel already closed.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::oneshot;
use tracing::debug;

use super::broker::{Broker, BrokerConnection, BrokerError, Session};

const REPLY_SUCCESS: u16 = 200;
const PERSISTENT: u8 = 2;

/// Connection parameters for [`AmqpBroker`].
#[derive(Debug, Clone)]
pub struct AmqpConfig {
    /// `host` or `host:port`.
    pub host: String,
    pub user: String,
    pub pass: String,
    pub vhost: String,
    /// Use `amqps` instead of `amqp`.
    pub amqps: bool,
}

impl AmqpConfig {
    pub fn uri(&self) -> String {
        let scheme = if self.amqps { "amqps" } else { "amqp" };
        let credentials = if self.user.is_empty() {
            String::new()
        } else {
            format!("{}:{}@", self.user, self.pass)
        };
        // An absent path selects the default vhost "/".
        let vhost = match self.vhost.as_str() {
            "" | "/" => String::new(),
            vhost => format!("/{}", vhost.replace('/', "%2f")),
        };
        format!("{scheme}://{credentials}{}{vhost}", self.host)
    }
}

pub struct AmqpBroker {
    uri: String,
}

impl AmqpBroker {
    pub fn new(config: &AmqpConfig) -> Self {
        Self { uri: config.uri() }
    }
}

type Notifier = Arc<Mutex<Option<oneshot::Sender<BrokerError>>>>;

fn notify_closed(notifier: &Notifier, reason: BrokerError) {
    if let Some(tx) = notifier.lock().ok().and_then(|mut slot| slot.take()) {
        let _ = tx.send(reason);
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn dial(&self) -> Result<Session, BrokerError> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close(REPLY_SUCCESS, "channel setup failed").await;
                return Err(BrokerError::Connect(format!("can't open channel: {e}")));
            }
        };

        let (tx, closed) = oneshot::channel();
        let notifier: Notifier = Arc::new(Mutex::new(Some(tx)));
        let on_error = Arc::clone(&notifier);
        connection.on_error(move |e| notify_closed(&on_error, BrokerError::Closed(e.to_string())));

        debug!("amqp connection and channel open");
        Ok(Session {
            connection: Arc::new(AmqpConnection {
                connection,
                channel,
                notifier,
            }),
            closed,
        })
    }
}

struct AmqpConnection {
    connection: Connection,
    channel: Channel,
    notifier: Notifier,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn declare_topic(&self, topic: &str) -> Result<(), BrokerError> {
        let options = ExchangeDeclareOptions {
            durable: true,
            ..ExchangeDeclareOptions::default()
        };
        self.channel
            .exchange_declare(topic, ExchangeKind::Fanout, options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::Declare {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let timestamp = u64::try_from(Utc::now().timestamp()).unwrap_or_default();
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into())
            .with_timestamp(timestamp);

        let result = match self
            .channel
            .basic_publish(topic, "", BasicPublishOptions::default(), payload, properties)
            .await
        {
            Ok(confirm) => confirm.await.map(|_| ()),
            Err(e) => Err(e),
        };

        result.map_err(|e| {
            if !self.channel.status().connected() {
                notify_closed(&self.notifier, BrokerError::Closed(format!("channel closed: {e}")));
            }
            BrokerError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            }
        })
    }

    fn is_closed(&self) -> bool {
        !self.connection.status().connected()
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.connection
            .close(REPLY_SUCCESS, "closing")
            .await
            .map_err(|e| BrokerError::Closed(e.to_string()))
    }
}
