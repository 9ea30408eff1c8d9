//! The unit of work flowing through the forwarder.
//!
//! `Item` is what a [`Source`](super::Source) produces, what the publisher
//! serialises onto the broker, and what the store records once forwarded.
//! Every component stays format-agnostic by speaking only in `Item`s.
//!
//! ## Wire format
//!
//! The JSON payload published to the broker is
//! `{"title", "date", "author", "summary", "url"}`; `published_at` is
//! serialised under the name `date` because that is what consumers read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single discovered entry, normalised from the source format.
///
/// Items are never mutated after creation. Two items with the same `url` are
/// the same item, whatever their other fields say.
///
/// ## Sorting
///
/// `Item` implements [`Ord`] for **reverse-chronological** ordering: newer
/// items sort before older ones.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Headline.
    pub title: String,

    /// Publication timestamp.
    #[serde(rename = "date")]
    pub published_at: DateTime<Utc>,

    /// Author name, empty when the source did not provide one.
    pub author: String,

    /// Short summary text, empty when the source did not provide one.
    pub summary: String,

    /// Absolute link to the full content. This is the natural key.
    pub url: String,
}

// ---------------------------------------------------------------------------
// Ordering: reverse chronological (newest first)
// ---------------------------------------------------------------------------

impl Ord for Item {
    fn cmp(&self, other: &Self) -> Ordering {
        other.published_at.cmp(&self.published_at)
    }
}

impl PartialOrd for Item {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::item;

    #[test]
    fn sort_reverse_chronological() {
        let old = item("/old", "2024-01-01");
        let mid = item("/mid", "2025-06-15");
        let new = item("/new", "2026-01-01");

        let mut items = vec![old, new, mid];
        items.sort();

        assert_eq!(items[0].url, "/new", "newest first");
        assert_eq!(items[1].url, "/mid");
        assert_eq!(items[2].url, "/old", "oldest last");
    }

    #[test]
    fn same_date_keeps_fetch_order_under_stable_sort() {
        let a = item("/a", "2025-06-01");
        let b = item("/b", "2025-06-01");
        assert_eq!(a.cmp(&b), Ordering::Equal);

        let mut items = vec![a, b];
        items.sort();
        assert_eq!(items[0].url, "/a");
    }

    #[test]
    fn payload_uses_date_field_name() {
        let encoded = serde_json::to_value(item("/a", "2024-01-01")).unwrap();

        assert_eq!(encoded["url"], "/a");
        assert_eq!(encoded["date"], "2024-01-01T00:00:00Z");
        assert!(encoded.get("published_at").is_none());
    }
}
