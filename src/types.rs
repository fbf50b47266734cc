//! Core types: link index items and run counters

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

/// An index entry that has not been scraped yet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnresolvedLink {
    /// Detail page to scrape
    pub source: Url,
    /// Date of the content item, from the index listing
    pub captured_on: NaiveDate,
    /// Free-text label from the listing (may be empty)
    pub title: String,
}

impl UnresolvedLink {
    /// Create a new unresolved link
    pub fn new(source: Url, captured_on: NaiveDate, title: impl Into<String>) -> Self {
        Self {
            source,
            captured_on,
            title: title.into(),
        }
    }

    /// Attach the media address found on the detail page.
    ///
    /// Consumes the unresolved link; there is no way back.
    pub fn resolve(self, media: Url) -> ResolvedLink {
        ResolvedLink { link: self, media }
    }
}

/// An index entry whose detail page yielded a media address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedLink {
    link: UnresolvedLink,
    media: Url,
}

impl ResolvedLink {
    /// Detail page the media was found on
    pub fn source(&self) -> &Url {
        &self.link.source
    }

    /// Date of the content item
    pub fn captured_on(&self) -> NaiveDate {
        self.link.captured_on
    }

    /// Listing title
    pub fn title(&self) -> &str {
        &self.link.title
    }

    /// Absolute address of the media resource
    pub fn media(&self) -> &Url {
        &self.media
    }
}

/// Outcome counters shared by both stages of a run
///
/// Workers only ever increment; the coordinator reads a [`RunSummary`] once both
/// stages have finished.
#[derive(Debug, Default)]
pub struct RunCounters {
    fetched: AtomicU64,
    skipped: AtomicU64,
    errored: AtomicU64,
}

impl RunCounters {
    /// Record a completed download
    pub fn record_fetched(&self) {
        self.fetched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a duplicate or a page without media
    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a per-item failure
    pub fn record_errored(&self) {
        self.errored.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            fetched: self.fetched.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RunCounters`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Items downloaded
    pub fetched: u64,
    /// Items skipped (duplicate destination or no media on the page)
    pub skipped: u64,
    /// Items that failed
    pub errored: u64,
}

impl CounterSnapshot {
    /// Sum of all outcomes
    pub fn total(&self) -> u64 {
        self.fetched + self.skipped + self.errored
    }
}

/// Result of a completed run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Number of items the index lister returned
    pub listed: usize,
    /// Number of items submitted to the pipeline after truncation
    pub queued: usize,
    /// Final counter values
    #[serde(flatten)]
    pub counters: CounterSnapshot,
    /// Wall-clock duration of the run
    #[serde(with = "secs_f64")]
    pub elapsed: Duration,
}

mod secs_f64 {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
