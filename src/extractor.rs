//! Media link extraction from detail-page markup

use crate::error::{Error, Result};
use regex::Regex;
use url::Url;

/// Finds the single embedded media link on a detail page
///
/// Pure pattern matching; no I/O. The first capture group of the configured
/// pattern is the link.
#[derive(Clone, Debug)]
pub struct MediaExtractor {
    pattern: Regex,
}

impl MediaExtractor {
    /// Compile an extractor from a pattern with at least one capture group
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| Error::config("media_pattern", e.to_string()))?;
        if pattern.captures_len() < 2 {
            return Err(Error::config(
                "media_pattern",
                "pattern needs a capture group for the media link",
            ));
        }
        Ok(Self { pattern })
    }

    /// Raw link text of the first match, or `None` when absent or blank
    pub fn extract<'a>(&self, markup: &'a str) -> Option<&'a str> {
        let src = self.pattern.captures(markup)?.get(1)?.as_str().trim();
        (!src.is_empty()).then_some(src)
    }

    /// Extract the link and resolve it against `base`
    ///
    /// Returns `Ok(None)` when the page has no media, and an error when the
    /// link text cannot form a URL.
    pub fn resolve(&self, markup: &str, base: &Url) -> Result<Option<Url>> {
        let Some(src) = self.extract(markup) else {
            return Ok(None);
        };
        base.join(src).map(Some).map_err(|e| Error::InvalidAddress {
            address: src.to_string(),
            reason: e.to_string(),
        })
    }
}
