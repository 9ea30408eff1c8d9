//! Durable record of what has already been forwarded.
//!
//! The forwarded-set only ever grows. Entries are matched by `url`; a url
//! recorded twice is harmless because membership is all the reconciliation
//! loop asks about.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::{PgStore, StoreConfig};

use async_trait::async_trait;

use crate::source::Item;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("schema migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Raised by [`MemoryStore`] when a failure has been injected.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence port used by the reconciliation loop.
#[async_trait]
pub trait Store: Send + Sync {
    /// Every item ever recorded. Order carries no meaning.
    async fn get_all(&self) -> Result<Vec<Item>, StoreError>;

    /// Record one more forwarded item. Recording a url that is already
    /// present succeeds and leaves the set semantically unchanged.
    async fn add(&self, item: &Item) -> Result<(), StoreError>;
}
