//! feed-forwarder: forwards every new feed item to a message broker.
//!
//! ## Architecture overview
//!
//! ```text
//!                 fetch()          get_all() / add()
//! ┌───────────┐ ◄────────── ┌─────────────┐ ──────────► ┌──────────┐
//! │ source/   │             │ reconcile   │             │ store/   │
//! │ (RSS)     │ ──────────► │ (loop task) │             │ (Pg)     │
//! └───────────┘  Vec<Item>  └─────────────┘             └──────────┘
//!                                  │ publish()
//!                                  ▼
//!                           ┌─────────────┐  close notification  ┌──────────┐
//!                           │ publisher/  │ ◄─────────────────── │ watchdog │
//!                           │ (manager)   │ ───────────────────► │ (task)   │
//!                           └─────────────┘      reconnect       └──────────┘
//! ```
//!
//! * **`source/`**: the [`Source`](source::Source) trait, the [`Item`](source::Item)
//!   type and the RSS implementation.
//! * **`store/`**: the forwarded-set: PostgreSQL in production, in-memory
//!   for tests and dry runs.
//! * **`publisher/`**: the connection manager that owns the broker
//!   connection and reconnects in the background, plus the AMQP broker.
//! * **`reconcile`**: the fetch → diff → publish → record loop.
//! * **`config`**: environment configuration.

pub mod config;
pub mod publisher;
pub mod reconcile;
pub mod source;
pub mod store;

#[cfg(test)]
mod testing;
