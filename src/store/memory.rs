//! In-process forwarded-set with on-demand failures.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Store, StoreError};
use crate::source::Item;

/// In-process forwarded-set.
///
/// The store the reconciliation tests run against. Reads and individual
/// writes can be made to fail on demand.
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<Vec<Item>>,
    fail_reads: AtomicBool,
    /// Urls whose `add` fails.
    fail_adds: std::sync::Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already contains `items`.
    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        Self {
            items: RwLock::new(items.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Make every subsequent [`Store::get_all`] fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make [`Store::add`] fail for `url` until [`MemoryStore::heal_add`].
    pub fn fail_add(&self, url: &str) {
        if let Ok(mut urls) = self.fail_adds.lock() {
            urls.insert(url.to_string());
        }
    }

    pub fn heal_add(&self, url: &str) {
        if let Ok(mut urls) = self.fail_adds.lock() {
            urls.remove(url);
        }
    }

    /// Recorded urls in insertion order, duplicates included.
    pub async fn urls(&self) -> Vec<String> {
        self.items.read().await.iter().map(|i| i.url.clone()).collect()
    }

    fn add_should_fail(&self, url: &str) -> bool {
        self.fail_adds.lock().map(|urls| urls.contains(url)).unwrap_or(false)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_all(&self) -> Result<Vec<Item>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads disabled".into()));
        }
        Ok(self.items.read().await.clone())
    }

    async fn add(&self, item: &Item) -> Result<(), StoreError> {
        if self.add_should_fail(&item.url) {
            return Err(StoreError::Unavailable(format!("add of {} disabled", item.url)));
        }
        self.items.write().await.push(item.clone());
        Ok(())
    }
}
