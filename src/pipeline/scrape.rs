//! Scrape stage unit of work: detail page -> media address.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::extractor::MediaExtractor;
use crate::http::HttpClient;
use crate::status::{Status, StatusSink};
use crate::types::{ResolvedLink, RunCounters, UnresolvedLink};

/// Resolves detail pages into media addresses
///
/// Every failure is handled here: a page without media is counted as skipped,
/// anything else as errored, and both yield `None` so the item goes no further.
pub struct Scraper {
    http: HttpClient,
    extractor: MediaExtractor,
    base: Url,
    counters: Arc<RunCounters>,
    status: Arc<dyn StatusSink>,
}

impl Scraper {
    /// Create a scraper
    pub fn new(
        http: HttpClient,
        extractor: MediaExtractor,
        base: Url,
        counters: Arc<RunCounters>,
        status: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            http,
            extractor,
            base,
            counters,
            status,
        }
    }

    /// Scrape one detail page
    pub async fn scrape(&self, link: UnresolvedLink) -> Option<ResolvedLink> {
        let page = link.source.as_str();
        self.status.log(Status::Scraping, page);

        match self.media_for(&link.source).await {
            Ok(media) => {
                self.status.log(Status::Scraped, page);
                Some(link.resolve(media))
            }
            Err(Error::NoMatch { .. }) => {
                self.counters.record_skipped();
                self.status.log(Status::NoImage, page);
                None
            }
            Err(e) => {
                debug!(url = %page, error = %e, "Scrape failed");
                self.counters.record_errored();
                self.status.log(Status::BadScrape, &e.to_string());
                None
            }
        }
    }

    /// Load `page` and resolve its media address
    async fn media_for(&self, page: &Url) -> Result<Url> {
        let markup = self.http.get_text(page).await?;
        self.extractor
            .resolve(&markup, &self.base)?
            .ok_or_else(|| Error::NoMatch {
                page: page.to_string(),
            })
    }
}
