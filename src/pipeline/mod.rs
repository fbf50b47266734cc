//! Pipeline coordinator: lists the index, then scrapes and fetches every item.
//!
//! The pipeline is two [`Stage`]s:
//! - [`scrape`] - detail page -> media address (drops pages without media)
//! - [`fetch`] - media address -> file under the storage root
//!
//! Scrape outputs that carry a resolved link go to the fetch stage; the rest go
//! to an explicit discard sink. Scrape completion or fault is forwarded to the
//! fetch stage, and the run is over when the fetch stage finishes.

pub mod fetch;
pub mod scrape;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use fetch::{FetchOutcome, Fetcher};
pub use scrape::Scraper;

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ListingError, Result};
use crate::extractor::MediaExtractor;
use crate::http::HttpClient;
use crate::lister::{ArchiveLister, IndexLister};
use crate::stage::{DiscardSink, Stage, StageError, StageFault};
use crate::status::{Status, StatusSink};
use crate::types::{ResolvedLink, RunCounters, RunSummary, UnresolvedLink};

/// How a run ended, when it did not end cleanly
#[derive(Debug, Error)]
pub enum RunError {
    /// The index could not be listed; nothing was processed
    #[error(transparent)]
    Listing(#[from] ListingError),

    /// A stage faulted; counters reflect the work done before the fault
    #[error("pipeline faulted with {} error(s)", faults.len())]
    Faulted {
        /// Every fault collected by the fetch stage, including upstream ones
        faults: Vec<StageFault>,
        /// Counts at the time the pipeline stopped
        summary: RunSummary,
    },

    /// The run was cancelled by the operator
    #[error("pipeline cancelled")]
    Cancelled {
        /// Counts at the time the pipeline stopped
        summary: RunSummary,
    },
}

/// Runs the scrape-and-fetch pipeline for one configuration
pub struct Pipeline {
    config: Arc<Config>,
    http: HttpClient,
    lister: Arc<dyn IndexLister>,
    status: Arc<dyn StatusSink>,
    cancel: CancellationToken,
}

impl Pipeline {
    /// Create a pipeline that lists items from the configured archive page
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the HTTP client cannot
    /// be created
    pub fn new(config: Config, status: Arc<dyn StatusSink>) -> Result<Self> {
        config.validate()?;
        let http = HttpClient::new(&config)?;
        let lister = Arc::new(ArchiveLister::new(http.clone(), &config)?);
        Ok(Self {
            config: Arc::new(config),
            http,
            lister,
            status,
            cancel: CancellationToken::new(),
        })
    }

    /// Replace the index lister
    pub fn with_lister(mut self, lister: Arc<dyn IndexLister>) -> Self {
        self.lister = lister;
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels this pipeline's runs
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// List, scrape and fetch, reporting progress to the status sink
    pub async fn run(&self) -> std::result::Result<RunSummary, RunError> {
        let started = Instant::now();
        let counters = Arc::new(RunCounters::default());

        self.status.log(
            Status::Info,
            &format!("Fetching archive list from {}", self.config.archive_url),
        );

        let listed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(self.cancelled(summarize(&counters, 0, 0, started)));
            }
            listed = self.lister.list() => listed,
        };
        let mut links = match listed {
            Ok(links) => links,
            Err(e) => {
                warn!(error = %e, "Listing failed");
                self.status.log(Status::BadGetUrls, &e.to_string());
                return Err(e.into());
            }
        };

        let listed = links.len();
        self.status
            .log(Status::Info, &format!("Parsed {listed} URIs"));

        if let Some(limit) = self.config.item_limit() {
            links.truncate(limit);
        }
        let queued = links.len();
        self.status.log(
            Status::Info,
            &format!("Queued {queued} images to be downloaded"),
        );

        let outcome = self.process(links, &counters).await;
        let summary = summarize(&counters, listed, queued, started);

        match outcome {
            Ok(()) => {
                let c = summary.counters;
                self.status.log(
                    Status::Finished,
                    &format!(
                        "Fetched: {}, Skipped: {}, Errors: {}, Seconds: {:.2}",
                        c.fetched,
                        c.skipped,
                        c.errored,
                        summary.elapsed.as_secs_f64()
                    ),
                );
                info!(
                    fetched = c.fetched,
                    skipped = c.skipped,
                    errored = c.errored,
                    "Run finished"
                );
                Ok(summary)
            }
            Err(StageError::Cancelled) => Err(self.cancelled(summary)),
            Err(StageError::Faulted(faults)) => {
                for fault in &faults {
                    self.status.log(Status::Failure, &fault.to_string());
                }
                Err(RunError::Faulted { faults, summary })
            }
        }
    }

    /// Feed `links` through both stages and wait for the fetch stage to finish
    async fn process(
        &self,
        links: Vec<UnresolvedLink>,
        counters: &Arc<RunCounters>,
    ) -> std::result::Result<(), StageError> {
        let scraper = Arc::new(Scraper::new(
            self.http.clone(),
            MediaExtractor::new(&self.config.media_pattern).map_err(internal_fault)?,
            self.config.base_url().map_err(internal_fault)?,
            Arc::clone(counters),
            Arc::clone(&self.status),
        ));
        let fetcher = Arc::new(Fetcher::new(
            self.http.clone(),
            self.config.save_to_path.clone(),
            self.config.overwrite_all,
            Arc::clone(counters),
            Arc::clone(&self.status),
        ));

        let fetch = Stage::builder("fetch", move |link: ResolvedLink| {
            let fetcher = Arc::clone(&fetcher);
            async move { Ok(fetcher.fetch(link).await) }
        })
        .parallelism(self.config.fetch_parallelism)
        .cancel(self.cancel.clone())
        .spawn();

        let drops = DiscardSink::new("scrape-drops");
        let scrape = Stage::builder("scrape", move |link: UnresolvedLink| {
            let scraper = Arc::clone(&scraper);
            async move { Ok(scraper.scrape(link).await) }
        })
        .parallelism(self.config.scrape_parallelism)
        .cancel(self.cancel.clone())
        .link_to(fetch.input().flatten(), Option::is_some)
        .link_to(Arc::clone(&drops), |_| true)
        .spawn();

        for link in links {
            if scrape.submit(link).is_err() {
                // stage already faulted or cancelled; its outcome reaches fetch
                break;
            }
        }
        scrape.complete();

        let outcome = fetch.await_completion().await;
        tracing::debug!(
            dropped = drops.discarded(),
            scraped = scrape.stats().processed,
            fetched = fetch.stats().processed,
            "Pipeline drained"
        );
        outcome
    }

    fn cancelled(&self, summary: RunSummary) -> RunError {
        self.status
            .log(Status::Cancelled, "The process was manually cancelled!");
        RunError::Cancelled { summary }
    }
}

fn summarize(counters: &RunCounters, listed: usize, queued: usize, started: Instant) -> RunSummary {
    RunSummary {
        listed,
        queued,
        counters: counters.snapshot(),
        elapsed: started.elapsed(),
    }
}

// Config was validated in `Pipeline::new`, so these only fire on a broken invariant
fn internal_fault(e: crate::Error) -> StageError {
    StageError::Faulted(vec![StageFault::Work {
        stage: "setup".to_string(),
        message: e.to_string(),
    }])
}
