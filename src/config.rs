//! Configuration types for podfetch

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Concurrency cap for a pipeline stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ParallelismRepr", into = "ParallelismRepr")]
pub enum Parallelism {
    /// No cap: every queued item may run at once
    Unbounded,
    /// At most this many units of work run at once
    Limited(usize),
}

impl Parallelism {
    /// Largest cap a stage can enforce
    pub const MAX_LIMIT: usize = tokio::sync::Semaphore::MAX_PERMITS;

    /// A bounded cap, rejecting 0 and anything above [`Parallelism::MAX_LIMIT`]
    pub fn limited(n: usize) -> std::result::Result<Self, String> {
        match n {
            0 => Err("parallelism must be at least 1".to_string()),
            n if n > Self::MAX_LIMIT => Err(format!(
                "parallelism must be at most {}, got {n}",
                Self::MAX_LIMIT
            )),
            n => Ok(Parallelism::Limited(n)),
        }
    }

    /// The cap, or `None` when unbounded
    pub fn limit(self) -> Option<usize> {
        match self {
            Parallelism::Unbounded => None,
            Parallelism::Limited(n) => Some(n),
        }
    }
}

impl fmt::Display for Parallelism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parallelism::Unbounded => f.write_str("unbounded"),
            Parallelism::Limited(n) => write!(f, "{n}"),
        }
    }
}

impl std::str::FromStr for Parallelism {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("unbounded") {
            return Ok(Parallelism::Unbounded);
        }
        match s.parse::<usize>() {
            Ok(n) => Parallelism::limited(n),
            Err(_) => Err(format!("expected a positive integer or \"unbounded\", got {s:?}")),
        }
    }
}

// TOML form: either the string "unbounded" or a positive integer.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ParallelismRepr {
    Count(usize),
    Word(String),
}

impl TryFrom<ParallelismRepr> for Parallelism {
    type Error = String;

    fn try_from(repr: ParallelismRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            ParallelismRepr::Count(n) => Parallelism::limited(n),
            ParallelismRepr::Word(word) => word.parse(),
        }
    }
}

impl From<Parallelism> for ParallelismRepr {
    fn from(p: Parallelism) -> Self {
        match p {
            Parallelism::Unbounded => ParallelismRepr::Word("unbounded".to_string()),
            Parallelism::Limited(n) => ParallelismRepr::Count(n),
        }
    }
}

/// Run configuration, read once at startup and immutable for the run
///
/// Every field has a default, so an empty TOML file is a valid configuration
/// that mirrors the public APOD archive.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base address that relative page and media links are resolved against
    pub base_url: String,

    /// Address of the index page listing every content item
    pub archive_url: String,

    /// Storage root for downloaded media (default: "./apod")
    pub save_to_path: PathBuf,

    /// Maximum number of listed items fed into the pipeline (0 = no limit)
    pub max_to_fetch: usize,

    /// Download even when the destination file already exists
    pub overwrite_all: bool,

    /// Concurrency cap for the scrape stage (default: unbounded)
    pub scrape_parallelism: Parallelism,

    /// Concurrency cap for the fetch stage (default: 8)
    pub fetch_parallelism: Parallelism,

    /// Per-request HTTP timeout (default: 30 seconds)
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,

    /// User agent sent with every request
    pub user_agent: String,

    /// Pattern locating the media link on a detail page; capture group 1 is the link
    pub media_pattern: String,

    /// Pattern for index entries; groups are date, page link and title
    pub listing_pattern: String,

    /// chrono format string for the date group of `listing_pattern`
    pub listing_date_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            archive_url: default_archive_url(),
            save_to_path: default_save_to_path(),
            max_to_fetch: 0,
            overwrite_all: false,
            scrape_parallelism: Parallelism::Unbounded,
            fetch_parallelism: default_fetch_parallelism(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            media_pattern: default_media_pattern(),
            listing_pattern: default_listing_pattern(),
            listing_date_format: default_listing_date_format(),
        }
    }
}

impl Config {
    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config {
            message: e.to_string(),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read {}: {}", path.display(), e),
            key: None,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check every setting that can be wrong without touching the network
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;
        self.archive_url()?;

        for (key, parallelism) in [
            ("scrape_parallelism", self.scrape_parallelism),
            ("fetch_parallelism", self.fetch_parallelism),
        ] {
            if let Some(n) = parallelism.limit()
                && let Err(message) = Parallelism::limited(n)
            {
                return Err(Error::config(key, message));
            }
        }

        if self.request_timeout.is_zero() {
            return Err(Error::config("request_timeout", "timeout must be non-zero"));
        }

        let media = compile("media_pattern", &self.media_pattern)?;
        if media.captures_len() < 2 {
            return Err(Error::config(
                "media_pattern",
                "pattern needs a capture group for the media link",
            ));
        }

        let listing = compile("listing_pattern", &self.listing_pattern)?;
        if listing.captures_len() < 4 {
            return Err(Error::config(
                "listing_pattern",
                "pattern needs three capture groups: date, page, title",
            ));
        }

        Ok(())
    }

    /// Parsed [`Config::base_url`]
    pub fn base_url(&self) -> Result<Url> {
        parse_url("base_url", &self.base_url)
    }

    /// Parsed [`Config::archive_url`]
    pub fn archive_url(&self) -> Result<Url> {
        parse_url("archive_url", &self.archive_url)
    }

    /// Apply the `max_to_fetch` truncation rule to a listed item count
    pub fn item_limit(&self) -> Option<usize> {
        (self.max_to_fetch > 0).then_some(self.max_to_fetch)
    }
}

fn parse_url(key: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| Error::config(key, format!("invalid URL {value:?}: {e}")))
}

fn compile(key: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::config(key, e.to_string()))
}

fn default_base_url() -> String {
    "https://apod.nasa.gov/apod/".to_string()
}

fn default_archive_url() -> String {
    "https://apod.nasa.gov/apod/archivepix.html".to_string()
}

fn default_save_to_path() -> PathBuf {
    PathBuf::from("./apod")
}

fn default_fetch_parallelism() -> Parallelism {
    Parallelism::Limited(8)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    format!("podfetch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_media_pattern() -> String {
    r#"(?is)<img\s+src="(.*?)"\s.*?>"#.to_string()
}

fn default_listing_pattern() -> String {
    r#"(\d{4}\s.*?\d{2}):\s*?<a\shref="(ap\d{6}\.html)">(.*?)</a>"#.to_string()
}

fn default_listing_date_format() -> String {
    "%Y %B %d".to_string()
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
