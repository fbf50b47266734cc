//! # podfetch
//!
//! Downloads the media embedded in every page of a content archive, such as the
//! Astronomy Picture of the Day.
//!
//! ## How it works
//!
//! 1. An [`IndexLister`](lister::IndexLister) reads the archive page into a list
//!    of detail-page links.
//! 2. The **scrape** stage fetches each detail page and extracts its media link.
//! 3. The **fetch** stage downloads each media link to a deterministic path
//!    under the storage root, skipping files that already exist.
//!
//! Both stages run with independently configurable parallelism. Per-item
//! failures are counted and reported, never fatal; only an unexpected failure
//! escaping a stage tears the pipeline down.
//!
//! ## Quick Start
//!
//! ```no_run
//! use podfetch::{Config, ConsoleSink, Pipeline};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config {
//!         max_to_fetch: 10,
//!         ..Default::default()
//!     };
//!
//!     let pipeline = Pipeline::new(config, Arc::new(ConsoleSink::new()))?;
//!     podfetch::cancel_on_signal(pipeline.cancel_token());
//!
//!     let summary = pipeline.run().await?;
//!     println!("fetched {}", summary.counters.fetched);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Media link extraction
pub mod extractor;
/// HTTP access
pub mod http;
/// Index listing
pub mod lister;
/// Logging initialization
pub mod logging;
/// Scrape-and-fetch coordinator
pub mod pipeline;
/// Bounded-parallelism stages
pub mod stage;
/// Status reporting
pub mod status;
/// Core types and counters
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, Parallelism};
pub use error::{Error, FetchError, ListingError, Result};
pub use pipeline::{Pipeline, RunError};
pub use stage::{Stage, StageError, StageFault};
pub use status::{ConsoleSink, MemorySink, Status, StatusSink};
pub use types::{ResolvedLink, RunCounters, RunSummary, UnresolvedLink};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Returns the handle of the spawned listener task. Must be called from within
/// a tokio runtime.
pub fn cancel_on_signal(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => token.cancel(),
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for Ctrl+C only");
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
