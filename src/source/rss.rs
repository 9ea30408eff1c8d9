//! RSS feed source implementation.
//!
//! Fetches an RSS 2.0 document over HTTP with [`reqwest`] and converts its
//! `<item>`s into [`Item`]s with the [`rss`] crate. An item without a link or
//! without a parseable `<pubDate>` is skipped with a warning; the rest of the
//! feed is still returned.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{Item, Source, SourceError};

/// An RSS feed source.
pub struct RssSource {
    /// `http` or `https`.
    scheme: &'static str,
    /// Host (optionally with port) serving the feed.
    host: String,
    /// Full feed URL, built from scheme, host and path.
    url: String,
    client: reqwest::Client,
}

impl RssSource {
    /// Create a new RSS source for `{scheme}://{host}{path}`.
    ///
    /// # Arguments
    ///
    /// * `host`: e.g. `feeds.bbci.co.uk`.
    /// * `path`: e.g. `/news/rss.xml`.
    /// * `tls`: whether to use `https`.
    pub fn new(host: impl Into<String>, path: &str, tls: bool) -> Self {
        let scheme = if tls { "https" } else { "http" };
        let host = host.into();
        let url = format!("{scheme}://{host}{path}");
        Self {
            scheme,
            host,
            url,
            client: reqwest::Client::new(),
        }
    }

    /// The feed URL this source polls.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Parse an already-fetched [`rss::Channel`] into [`Item`]s, newest first.
    ///
    /// This is a pure function (no I/O) so that tests can exercise the
    /// parsing logic without hitting the network.
    pub fn parse_channel(&self, channel: &rss::Channel) -> Vec<Item> {
        let mut items: Vec<Item> = channel
            .items()
            .iter()
            .enumerate()
            .filter_map(|(index, item)| match self.convert(item) {
                Ok(converted) => Some(converted),
                Err(reason) => {
                    warn!(source = %self.url, index, reason, "skipping malformed feed item");
                    None
                }
            })
            .collect();

        // Feeds are conventionally newest first already; a stable sort keeps
        // that order for equal dates and fixes feeds that are not.
        items.sort();
        items
    }

    fn convert(&self, item: &rss::Item) -> Result<Item, &'static str> {
        let link = item.link().map(str::trim).filter(|l| !l.is_empty()).ok_or("no link")?;

        let published_at = item
            .pub_date()
            .ok_or("no pubDate")
            .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).map_err(|_| "invalid pubDate"))?
            .with_timezone(&Utc);

        let author = item
            .author()
            .or_else(|| item.dublin_core_ext().and_then(|dc| dc.creators().first().map(String::as_str)))
            .unwrap_or_default();

        Ok(Item {
            title: item.title().map(str::trim).unwrap_or("(untitled)").to_string(),
            published_at,
            author: author.trim().to_string(),
            summary: item.description().map(str::trim).unwrap_or_default().to_string(),
            url: self.absolute(link),
        })
    }

    /// Resolve a host-relative link (`/posts/1`) against this feed's origin.
    fn absolute(&self, link: &str) -> String {
        if link.starts_with('/') {
            format!("{}://{}{link}", self.scheme, self.host)
        } else {
            link.to_string()
        }
    }
}

#[async_trait]
impl Source for RssSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch(&self, timeout: Duration) -> Result<Vec<Item>, SourceError> {
        let request_error = |source| SourceError::Request {
            url: self.url.clone(),
            source,
        };

        let response = self
            .client
            .get(&self.url)
            .timeout(timeout)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: self.url.clone(),
                status,
            });
        }

        let body = response.bytes().await.map_err(request_error)?;
        let channel = rss::Channel::read_from(body.as_ref()).map_err(|e| SourceError::Parse {
            url: self.url.clone(),
            reason: e.to_string(),
        })?;

        let items = self.parse_channel(&channel);
        debug!(source = %self.url, count = items.len(), "fetched feed");
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
