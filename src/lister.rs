//! Index listing: turning the archive page into unresolved link items

use crate::config::Config;
use crate::error::{Error, ListingError, Result};
use crate::http::HttpClient;
use crate::types::UnresolvedLink;
use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use tracing::debug;
use url::Url;

/// Source of the initial item list
#[async_trait]
pub trait IndexLister: Send + Sync {
    /// Produce every listed item, in listing order
    async fn list(&self) -> std::result::Result<Vec<UnresolvedLink>, ListingError>;
}

/// Parses index-page markup into [`UnresolvedLink`]s
#[derive(Clone, Debug)]
pub struct ListingParser {
    pattern: Regex,
    date_format: String,
    base: Url,
}

impl ListingParser {
    /// Build a parser from the listing settings of a [`Config`]
    pub fn from_config(config: &Config) -> Result<Self> {
        let pattern = Regex::new(&config.listing_pattern)
            .map_err(|e| Error::config("listing_pattern", e.to_string()))?;
        if pattern.captures_len() < 4 {
            return Err(Error::config(
                "listing_pattern",
                "pattern needs three capture groups: date, page, title",
            ));
        }
        Ok(Self {
            pattern,
            date_format: config.listing_date_format.clone(),
            base: config.base_url()?,
        })
    }

    /// Parse every entry on the page
    ///
    /// An entry whose date or page link cannot be interpreted fails the whole
    /// listing. A page without entries is [`ListingError::Empty`].
    pub fn parse(
        &self,
        markup: &str,
        page: &Url,
    ) -> std::result::Result<Vec<UnresolvedLink>, ListingError> {
        let mut links = Vec::new();

        for caps in self.pattern.captures_iter(markup) {
            let (Some(date), Some(href)) = (caps.get(1), caps.get(2)) else {
                continue;
            };
            let title = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");

            let date = date.as_str().trim();
            let captured_on = NaiveDate::parse_from_str(date, &self.date_format)
                .map_err(|e| ListingError::Parse(format!("bad date {date:?}: {e}")))?;
            let source = self
                .base
                .join(href.as_str())
                .map_err(|e| ListingError::Parse(format!("bad link {:?}: {}", href.as_str(), e)))?;

            links.push(UnresolvedLink::new(source, captured_on, title));
        }

        if links.is_empty() {
            return Err(ListingError::Empty {
                page: page.to_string(),
            });
        }

        debug!(page = %page, entries = links.len(), "Parsed index page");
        Ok(links)
    }
}

/// Lists items by downloading and parsing the archive page
pub struct ArchiveLister {
    http: HttpClient,
    archive: Url,
    parser: ListingParser,
}

impl ArchiveLister {
    /// Create a lister for the configured archive page
    pub fn new(http: HttpClient, config: &Config) -> Result<Self> {
        Ok(Self {
            http,
            archive: config.archive_url()?,
            parser: ListingParser::from_config(config)?,
        })
    }
}

#[async_trait]
impl IndexLister for ArchiveLister {
    async fn list(&self) -> std::result::Result<Vec<UnresolvedLink>, ListingError> {
        let markup = self.http.get_text(&self.archive).await?;
        self.parser.parse(&markup, &self.archive)
    }
}
