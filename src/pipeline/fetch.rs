//! Fetch stage unit of work: media address -> file on disk.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::Result;
use crate::http::HttpClient;
use crate::status::{Status, StatusSink};
use crate::types::{ResolvedLink, RunCounters};
use crate::utils::destination_path;

/// What happened to one resolved item
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The media was downloaded
    Fetched {
        /// Where it was written
        path: PathBuf,
        /// Bytes written
        bytes: u64,
    },
    /// The destination already existed, or was claimed earlier in this run
    Duplicate {
        /// The existing destination
        path: PathBuf,
    },
    /// The download failed
    Failed,
}

/// Downloads resolved media into the storage root, at most once per path
pub struct Fetcher {
    http: HttpClient,
    root: PathBuf,
    overwrite: bool,
    counters: Arc<RunCounters>,
    status: Arc<dyn StatusSink>,
    // Destinations already taken by a worker in this run
    claimed: Mutex<HashSet<PathBuf>>,
}

impl Fetcher {
    /// Create a fetcher writing below `root`
    pub fn new(
        http: HttpClient,
        root: PathBuf,
        overwrite: bool,
        counters: Arc<RunCounters>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            http,
            root,
            overwrite,
            counters,
            status,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Fetch one resolved item, counting the outcome
    pub async fn fetch(&self, link: ResolvedLink) -> FetchOutcome {
        match self.try_fetch(&link).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(url = %link.media(), error = %e, "Fetch failed");
                self.counters.record_errored();
                self.status.log(Status::BadFetch, &e.to_string());
                FetchOutcome::Failed
            }
        }
    }

    async fn try_fetch(&self, link: &ResolvedLink) -> Result<FetchOutcome> {
        let path = destination_path(&self.root, link.media())?;
        let label = describe(link, &path);

        if !self.claim(&path) {
            return Ok(self.duplicate(path, &label));
        }
        if !self.overwrite && tokio::fs::try_exists(&path).await? {
            return Ok(self.duplicate(path, &label));
        }

        self.status.log(Status::Fetching, &label);
        let bytes = self.http.download(link.media(), &path).await?;

        self.counters.record_fetched();
        self.status.log(Status::Fetched, &label);
        Ok(FetchOutcome::Fetched { path, bytes })
    }

    fn claim(&self, path: &std::path::Path) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf())
    }

    fn duplicate(&self, path: PathBuf, label: &str) -> FetchOutcome {
        self.counters.record_skipped();
        self.status.log(Status::DupImage, label);
        FetchOutcome::Duplicate { path }
    }
}

/// "08/23/2013 - saturn.jpg"
fn describe(link: &ResolvedLink, path: &std::path::Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{} - {}", link.captured_on().format("%m/%d/%Y"), name)
}
