//! Environment configuration.
//!
//! Every knob is an environment variable (a `.env` file is loaded by `main`
//! first, if present). Durations are whole seconds. Empty values count as
//! unset.

use std::time::Duration;

use tracing::warn;

use crate::publisher::{AmqpConfig, PublisherConfig};
use crate::reconcile::ReconcilerConfig;
use crate::store::StoreConfig;

pub const DEFAULT_SOURCE_HOST: &str = "feeds.bbci.co.uk";
pub const DEFAULT_SOURCE_PATH: &str = "/news/rss.xml";
pub const DEFAULT_DATABASE: &str = "feed_forwarder";
pub const DEFAULT_EXCHANGE: &str = "posts";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub host: String,
    pub path: String,
    pub tls: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub source: SourceConfig,
    pub scan_interval: Duration,
    /// Applied to the feed request, broker connect/publish and store acquire.
    pub network_timeout: Duration,
    pub store: StoreConfig,
    pub broker: AmqpConfig,
    pub exchange: String,
    pub reconnect_delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` uses the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(lookup);
        let network_timeout = vars.seconds("NETWORK_TIMEOUT")?;

        let mut source = SourceConfig {
            host: vars.optional("SOURCE_HOST").unwrap_or_default(),
            path: vars.optional("SOURCE_PATH").unwrap_or_default(),
            tls: vars.flag("SOURCE_TLS")?,
        };
        if source.host.is_empty() {
            warn!(
                host = DEFAULT_SOURCE_HOST,
                path = DEFAULT_SOURCE_PATH,
                "SOURCE_HOST is empty, using the default feed"
            );
            source = SourceConfig {
                host: DEFAULT_SOURCE_HOST.into(),
                path: DEFAULT_SOURCE_PATH.into(),
                tls: true,
            };
        }

        Ok(Self {
            source,
            scan_interval: vars.seconds("SCAN_INTERVAL")?,
            network_timeout,
            store: StoreConfig {
                host: vars.required("STORE_HOST")?,
                user: vars.optional("STORE_USER"),
                pass: vars.optional("STORE_PASS"),
                database: vars.optional("STORE_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.into()),
                acquire_timeout: network_timeout,
            },
            broker: AmqpConfig {
                host: vars.required("BROKER_HOST")?,
                user: vars.optional("BROKER_USER").unwrap_or_default(),
                pass: vars.optional("BROKER_PASS").unwrap_or_default(),
                vhost: vars.optional("BROKER_VHOST").unwrap_or_default(),
                amqps: vars.flag("BROKER_AMQPS")?,
            },
            exchange: vars.optional("BROKER_EXCHANGE").unwrap_or_else(|| DEFAULT_EXCHANGE.into()),
            reconnect_delay: vars.seconds("BROKER_RECONNECT_DELAY")?,
        })
    }

    pub fn publisher(&self) -> PublisherConfig {
        PublisherConfig {
            topic: self.exchange.clone(),
            reconnect_delay: self.reconnect_delay,
            timeout: self.network_timeout,
        }
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            interval: self.scan_interval,
            fetch_timeout: self.network_timeout,
        }
    }
}

struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.optional(key).ok_or(ConfigError::Missing(key))
    }

    fn flag(&self, key: &'static str) -> Result<bool, ConfigError> {
        match self.optional(key) {
            None => Ok(false),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => Ok(true),
                "0" | "false" | "no" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    key,
                    value,
                    reason: "expected true or false".into(),
                }),
            },
        }
    }

    /// A required, strictly positive number of seconds.
    fn seconds(&self, key: &'static str) -> Result<Duration, ConfigError> {
        let value = self.required(key)?;
        match value.parse::<u64>() {
            Ok(0) => Err(ConfigError::Invalid {
                key,
                value,
                reason: "must be greater than zero".into(),
            }),
            Ok(secs) => Ok(Duration::from_secs(secs)),
            Err(e) => Err(ConfigError::Invalid {
                key,
                value,
                reason: e.to_string(),
            }),
        }
    }
}
