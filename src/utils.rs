//! Utility functions for destination paths and directory handling

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use url::Url;

/// Suffix for in-progress downloads
const PART_SUFFIX: &str = ".part";

/// Map a media address to its file under the storage root
///
/// The file name is the lower-cased final path segment of the address, so the
/// same address always maps to the same path. That determinism is what lets an
/// existing file stand for "already fetched".
///
/// # Examples
///
/// ```
/// use podfetch::utils::destination_path;
/// use std::path::Path;
/// use url::Url;
///
/// let url = Url::parse("https://apod.nasa.gov/apod/image/1308/Saturn.JPG").unwrap();
/// let path = destination_path(Path::new("/pics"), &url).unwrap();
/// assert_eq!(path, Path::new("/pics/saturn.jpg"));
/// ```
pub fn destination_path(root: &Path, media: &Url) -> Result<PathBuf> {
    if let Some(mut segments) = media.path_segments()
        && let Some(last_segment) = segments.next_back()
        && !last_segment.is_empty()
    {
        return Ok(root.join(last_segment.to_lowercase()));
    }

    Err(Error::InvalidAddress {
        address: media.to_string(),
        reason: "address has no file name".to_string(),
    })
}

/// The temporary sibling a download streams into before it is renamed
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// Create the parent directory of `path` if it does not exist yet
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            tokio::fs::create_dir_all(parent).await?;
            Ok(())
        }
        _ => Ok(()),
    }
}
