//! Content source abstraction layer.
//!
//! This module defines the [`Source`] trait and the common [`Item`] type.
//! Concrete source implementations live in sub-modules (currently only
//! [`rss`]).
//!
//! ## For contributors: adding a new source
//!
//! 1. Create a new file in this directory (e.g. `atom.rs`).
//! 2. Define a struct (e.g. `AtomSource`) and implement [`Source`] for it.
//! 3. Add `mod atom;` below and re-export your struct in the `pub use` block.
//! 4. Construct an instance in `main.rs` instead of the RSS source.
//!
//! The reconciliation loop, the store and the publisher are all
//! source-agnostic.

mod item;
mod rss;

pub use item::Item;
pub use self::rss::RssSource;

use std::time::Duration;

use async_trait::async_trait;

/// Errors a [`Source`] can return for a whole fetch.
///
/// Malformed individual records are not errors; sources skip them and log a
/// warning.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The request could not be sent or the body could not be read.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("{url} answered with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// The body is not a document the source understands.
    #[error("can't parse content from {url}: {reason}")]
    Parse { url: String, reason: String },
}

/// Trait that every content source must implement.
///
/// The reconciliation loop calls [`fetch()`](Source::fetch) once per cycle
/// from a tokio task, so implementations must be [`Send`] + [`Sync`].
#[async_trait]
pub trait Source: Send + Sync {
    /// Human-readable label used in logs.
    fn name(&self) -> &str;

    /// Fetch the full current list of items, **newest first**.
    ///
    /// `timeout` bounds the whole network call.
    async fn fetch(&self, timeout: Duration) -> Result<Vec<Item>, SourceError>;
}
