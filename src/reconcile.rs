//! The reconciliation loop.
//!
//! Once per interval: fetch everything the source currently shows, drop what
//! the store says was already forwarded, then publish and record the rest,
//! oldest first. A cycle never fails as a whole. Its errors are collected
//! into a [`CycleReport`], logged, and the next cycle tries again.
//!
//! ## Delivery
//!
//! An item is recorded only after it was published. If recording fails the
//! item is published again next cycle, so consumers may see duplicates but
//! never miss an item.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::publisher::{PublishError, Publisher};
use crate::source::{Item, Source, SourceError};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Pause after each cycle, measured from the start of the wait.
    pub interval: Duration,
    /// Passed to [`Source::fetch`].
    pub fetch_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("can't fetch items: {0}")]
    Fetch(#[source] SourceError),

    #[error("can't read forwarded items: {0}")]
    ReadForwarded(#[source] StoreError),

    #[error("can't publish {url}: {error}")]
    Publish {
        url: String,
        #[source]
        error: PublishError,
    },

    #[error("published {url} but can't record it: {error}")]
    Record {
        url: String,
        #[source]
        error: StoreError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    FetchFailed,
    /// The source returned nothing; assumed to be a transient source problem.
    EmptySource,
    ReadFailed,
    NothingNew,
    /// Every new item was attempted.
    Processed,
    /// Cancellation was observed between two items.
    Interrupted,
}

/// What one cycle did.
#[derive(Debug)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub fetched: usize,
    pub new: usize,
    pub published: usize,
    pub recorded: usize,
    pub errors: Vec<CycleError>,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            outcome: CycleOutcome::Processed,
            fetched: 0,
            new: 0,
            published: 0,
            recorded: 0,
            errors: Vec::new(),
        }
    }

    fn finish(mut self, outcome: CycleOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    fn log(&self) {
        for e in &self.errors {
            error!(error = %e, "error during reconciliation");
        }
        info!(
            outcome = ?self.outcome,
            fetched = self.fetched,
            new = self.new,
            published = self.published,
            recorded = self.recorded,
            failures = self.errors.len(),
            "reconciliation cycle finished"
        );
    }
}

/// Items of `discovered` whose url is not in `forwarded`, in discovery order.
///
/// Only urls are compared; other fields may differ between a discovered item
/// and its forwarded record.
pub fn diff(discovered: &[Item], forwarded: &[Item]) -> Vec<Item> {
    let seen: HashSet<&str> = forwarded.iter().map(|i| i.url.as_str()).collect();
    discovered
        .iter()
        .filter(|i| !seen.contains(i.url.as_str()))
        .cloned()
        .collect()
}

pub struct Reconciler {
    source: Arc<dyn Source>,
    publisher: Arc<dyn Publisher>,
    store: Arc<dyn Store>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        source: Arc<dyn Source>,
        publisher: Arc<dyn Publisher>,
        store: Arc<dyn Store>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            source,
            publisher,
            store,
            config,
        }
    }

    /// Run cycles until `cancel` fires. The first cycle starts immediately.
    ///
    /// Never fails: per-cycle errors are logged and retried next cycle.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(source = self.source.name(), interval = ?self.config.interval, "starting reconciliation");

        while !cancel.is_cancelled() {
            self.cycle(&cancel).await.log();

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }

        info!("reconciliation finished");
    }

    /// One fetch → diff → publish → record pass.
    pub async fn cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::new();

        let items = match self.source.fetch(self.config.fetch_timeout).await {
            Ok(items) => items,
            Err(e) => {
                report.errors.push(CycleError::Fetch(e));
                return report.finish(CycleOutcome::FetchFailed);
            }
        };
        report.fetched = items.len();
        if items.is_empty() {
            warn!(source = self.source.name(), "source returned 0 items");
            return report.finish(CycleOutcome::EmptySource);
        }

        let forwarded = match self.store.get_all().await {
            Ok(forwarded) => forwarded,
            Err(e) => {
                report.errors.push(CycleError::ReadForwarded(e));
                return report.finish(CycleOutcome::ReadFailed);
            }
        };

        let new_items = diff(&items, &forwarded);
        report.new = new_items.len();
        if new_items.is_empty() {
            info!("no new items");
            return report.finish(CycleOutcome::NothingNew);
        }

        // The source lists newest first; consumers get them oldest first.
        for (done, item) in new_items.iter().rev().enumerate() {
            if cancel.is_cancelled() {
                info!(remaining = new_items.len() - done, "cancelled, leaving remaining items for the next run");
                return report.finish(CycleOutcome::Interrupted);
            }

            info!(url = %item.url, title = %item.title, "publishing item");
            if let Err(error) = self.publisher.publish(item).await {
                report.errors.push(CycleError::Publish {
                    url: item.url.clone(),
                    error,
                });
                continue;
            }
            report.published += 1;

            match self.store.add(item).await {
                Ok(()) => report.recorded += 1,
                Err(error) => report.errors.push(CycleError::Record {
                    url: item.url.clone(),
                    error,
                }),
            }
        }

        report.finish(CycleOutcome::Processed)
    }
}
