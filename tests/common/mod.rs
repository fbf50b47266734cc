//! Common test utilities: a mock picture site served by wiremock

#[allow(dead_code)]
pub mod fixtures;

pub use fixtures::*;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use podfetch::{Config, MemorySink, Pipeline};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A running mock site plus a scratch storage root
pub struct MockSite {
    pub server: MockServer,
    pub dir: TempDir,
}

#[allow(dead_code)]
impl MockSite {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
            dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    /// Storage root downloads land in
    pub fn storage(&self) -> PathBuf {
        self.dir.path().join("pics")
    }

    /// Configuration pointing at this site and storage root
    pub fn config(&self) -> Config {
        Config {
            base_url: format!("{}/apod/", self.server.uri()),
            archive_url: format!("{}/apod/archivepix.html", self.server.uri()),
            save_to_path: self.storage(),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    pub async fn mount_archive(&self, entries: &[ArchiveEntry]) {
        Mock::given(method("GET"))
            .and(path("/apod/archivepix.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string(archive_page(entries)))
            .mount(&self.server)
            .await;
    }

    /// Serve a detail page, expecting it to be requested `hits` times
    pub async fn mount_detail(&self, page: &str, body: String, hits: u64) {
        self.mount_detail_response(page, ResponseTemplate::new(200).set_body_string(body), hits)
            .await;
    }

    pub async fn mount_detail_response(&self, page: &str, response: ResponseTemplate, hits: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/apod/{page}")))
            .respond_with(response)
            .expect(hits)
            .mount(&self.server)
            .await;
    }

    /// Serve `/apod/image/{name}`, expecting it to be requested `hits` times
    pub async fn mount_image(&self, name: &str, hits: u64) {
        self.mount_image_response(name, image_response(name), hits)
            .await;
    }

    pub async fn mount_image_response(&self, name: &str, response: ResponseTemplate, hits: u64) {
        Mock::given(method("GET"))
            .and(path(format!("/apod/image/{name}")))
            .respond_with(response)
            .expect(hits)
            .mount(&self.server)
            .await;
    }

    /// Pipeline for `config` reporting into a fresh in-memory sink
    pub fn pipeline(&self, config: Config) -> (Pipeline, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let pipeline = Pipeline::new(config, sink.clone()).expect("Failed to create pipeline");
        (pipeline, sink)
    }
}

/// Image body used for `name`; the file name itself, so content is checkable
pub fn image_response(name: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "image/jpeg")
        .set_body_bytes(name.as_bytes().to_vec())
}
