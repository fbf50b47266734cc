//! Error types for podfetch
//!
//! Per-item failures (a page that will not load, a download that breaks off) are
//! represented here so the stage workers can classify them before converting them
//! into counters. Failures that escape a unit of work are a different thing and
//! live in [`crate::stage::StageFault`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for podfetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for podfetch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "base_url")
        key: Option<String>,
    },

    /// The index page could not be retrieved or parsed
    #[error("listing error: {0}")]
    Listing(#[from] ListingError),

    /// An HTTP request failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A detail page did not contain a media reference
    #[error("no media found on {page}")]
    NoMatch {
        /// The detail page that was scraped
        page: String,
    },

    /// A link could not be turned into a usable address or file name
    #[error("invalid address {address}: {reason}")]
    InvalidAddress {
        /// The offending address (as text, it may not parse)
        address: String,
        /// Why it was rejected
        reason: String,
    },

    /// A download could not be moved into place
    #[error("failed to finalize {path}: {reason}")]
    Finalize {
        /// Destination path
        path: PathBuf,
        /// Underlying reason
        reason: String,
    },

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::Config`] tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Failures retrieving or interpreting the index page
#[derive(Debug, Error)]
pub enum ListingError {
    /// The index page could not be downloaded
    #[error("could not retrieve index: {0}")]
    Request(#[from] FetchError),

    /// An entry on the index page could not be interpreted
    #[error("could not parse index entry: {0}")]
    Parse(String),

    /// The index page contained no recognizable entries
    #[error("no entries found on index page {page}")]
    Empty {
        /// The index page address
        page: String,
    },
}

/// HTTP request failures
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request timed out
    #[error("request to {url} timed out")]
    Timeout {
        /// Requested URL
        url: String,
    },

    /// The server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Connection-level failure
    #[error("request to {url} failed: {message}")]
    Network {
        /// Requested URL
        url: String,
        /// Error description
        message: String,
    },

    /// The response body could not be read
    #[error("failed to read body of {url}: {message}")]
    Body {
        /// Requested URL
        url: String,
        /// Error description
        message: String,
    },
}

impl FetchError {
    /// Classify a reqwest error, attaching the URL that was being requested.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else if err.is_body() || err.is_decode() {
            FetchError::Body {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// Whether the failure was a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}
