//! Operator-facing status lines
//!
//! Every significant pipeline event is reported through a [`StatusSink`]. The
//! console implementation color-codes each line by [`Status`] and serializes
//! writes so lines from concurrent workers never interleave.

use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::sync::Mutex;

/// Category of a status line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// General progress information
    Info,
    /// A detail page scrape started
    Scraping,
    /// A detail page yielded a media address
    Scraped,
    /// A download started
    Fetching,
    /// A download finished
    Fetched,
    /// The destination already exists
    DupImage,
    /// The detail page had no media reference
    NoImage,
    /// Scraping a detail page failed
    BadScrape,
    /// Downloading media failed
    BadFetch,
    /// The index page could not be listed
    BadGetUrls,
    /// The run was cancelled by the operator
    Cancelled,
    /// A stage faulted
    Failure,
    /// Final summary
    Finished,
}

impl Status {
    /// Every category, in lifecycle order
    pub const ALL: [Status; 13] = [
        Status::Info,
        Status::Scraping,
        Status::Scraped,
        Status::Fetching,
        Status::Fetched,
        Status::DupImage,
        Status::NoImage,
        Status::BadScrape,
        Status::BadFetch,
        Status::BadGetUrls,
        Status::Cancelled,
        Status::Failure,
        Status::Finished,
    ];

    /// Display name used as the line prefix
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Info => "Info",
            Status::Scraping => "Scraping",
            Status::Scraped => "Scraped",
            Status::Fetching => "Fetching",
            Status::Fetched => "Fetched",
            Status::DupImage => "DupImage",
            Status::NoImage => "NoImage",
            Status::BadScrape => "BadScrape",
            Status::BadFetch => "BadFetch",
            Status::BadGetUrls => "BadGetUrls",
            Status::Cancelled => "Cancelled",
            Status::Failure => "Failure",
            Status::Finished => "Finished",
        }
    }

    /// Whether the category reports a failure
    pub fn is_error(self) -> bool {
        matches!(
            self,
            Status::BadScrape | Status::BadFetch | Status::BadGetUrls | Status::Failure
        )
    }

    fn paint(self, text: &str) -> ColoredString {
        match self {
            Status::Scraping => text.purple(),
            Status::Fetching => text.green(),
            Status::Scraped => text.bright_magenta(),
            Status::Fetched => text.bright_green(),
            Status::NoImage => text.cyan(),
            Status::DupImage => text.bright_cyan(),
            Status::BadFetch | Status::BadScrape | Status::BadGetUrls | Status::Failure => {
                text.red()
            }
            Status::Cancelled => text.yellow(),
            Status::Info | Status::Finished => text.white(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // pad() so width specifiers like {:<10} apply
        f.pad(self.as_str())
    }
}

/// Destination for status lines
///
/// Implementations must tolerate concurrent calls from many workers.
pub trait StatusSink: Send + Sync {
    /// Report one event
    fn log(&self, status: Status, message: &str);
}

/// Writes colored status lines to stdout
pub struct ConsoleSink {
    lock: Mutex<()>,
}

impl ConsoleSink {
    /// Create a console sink
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }

    /// Format a status line without color
    pub fn format_line(status: Status, message: &str) -> String {
        format!("{status:<10} {message}")
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for ConsoleSink {
    fn log(&self, status: Status, message: &str) {
        tracing::debug!(status = status.as_str(), "{}", message);

        let line = Self::format_line(status, message);
        // A poisoned lock only means another writer panicked mid-line
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", status.paint(&line)).ok();
    }
}

/// Records status lines in memory
///
/// Useful for embedding the pipeline and for asserting on what was reported.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(Status, String)>>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded lines, in order
    pub fn lines(&self) -> Vec<(Status, String)> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Messages recorded under a given status
    pub fn messages(&self, status: Status) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(s, _)| *s == status)
            .map(|(_, m)| m)
            .collect()
    }

    /// Number of lines recorded under a given status
    pub fn count(&self, status: Status) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(s, _)| *s == status)
            .count()
    }
}

impl StatusSink for MemorySink {
    fn log(&self, status: Status, message: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((status, message.to_string()));
    }
}
