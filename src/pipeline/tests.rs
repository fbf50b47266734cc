//! Tests for the pipeline coordinator and its stage workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tempfile::{TempDir, tempdir};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::config::Parallelism;
use crate::error::FetchError;
use crate::status::MemorySink;

struct StaticLister(Vec<UnresolvedLink>);

#[async_trait]
impl IndexLister for StaticLister {
    async fn list(&self) -> std::result::Result<Vec<UnresolvedLink>, ListingError> {
        Ok(self.0.clone())
    }
}

struct FailingLister;

#[async_trait]
impl IndexLister for FailingLister {
    async fn list(&self) -> std::result::Result<Vec<UnresolvedLink>, ListingError> {
        Err(ListingError::Request(FetchError::Status {
            url: "http://archive.test/archivepix.html".into(),
            status: 503,
        }))
    }
}

fn page(src: &str) -> String {
    format!(r#"<html><center><IMG SRC="{src}" alt="pic"></center></html>"#)
}

fn link(server: &MockServer, page: &str, day: u32) -> UnresolvedLink {
    UnresolvedLink::new(
        Url::parse(&format!("{}/apod/{}", server.uri(), page)).unwrap(),
        NaiveDate::from_ymd_opt(2013, 8, day).unwrap(),
        format!("day {day}"),
    )
}

fn config(server: &MockServer, dir: &TempDir) -> Config {
    Config {
        base_url: format!("{}/apod/", server.uri()),
        archive_url: format!("{}/apod/archivepix.html", server.uri()),
        save_to_path: dir.path().join("pics"),
        request_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

async fn mount_page(server: &MockServer, name: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(format!("/apod/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_image(server: &MockServer, name: &str, expected_hits: u64) {
    Mock::given(method("GET"))
        .and(path(format!("/apod/image/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(name.as_bytes().to_vec()))
        .expect(expected_hits)
        .mount(server)
        .await;
}

fn pipeline(config: Config, links: Vec<UnresolvedLink>) -> (Pipeline, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::new(config, sink.clone())
        .unwrap()
        .with_lister(Arc::new(StaticLister(links)));
    (pipeline, sink)
}

#[tokio::test]
async fn dropped_items_never_reach_the_fetch_worker() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    mount_page(&server, "a.html", "<html>video only</html>".into()).await;
    mount_page(&server, "b.html", page("image/b.jpg")).await;
    Mock::given(method("GET"))
        .and(path("/apod/c.html"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = config(&server, &dir);
    let counters = Arc::new(RunCounters::default());
    let sink: Arc<dyn StatusSink> = Arc::new(MemorySink::new());
    let scraper = Arc::new(Scraper::new(
        HttpClient::new(&config).unwrap(),
        MediaExtractor::new(&config.media_pattern).unwrap(),
        config.base_url().unwrap(),
        Arc::clone(&counters),
        sink,
    ));

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let stub = Stage::builder("counting-fetch", move |link: ResolvedLink| {
        let seen = Arc::clone(&seen);
        async move {
            seen.fetch_add(1, Ordering::SeqCst);
            assert!(link.media().path().ends_with("/b.jpg"));
            Ok(())
        }
    })
    .spawn();

    let drops = DiscardSink::new("drops");
    let scrape = Stage::builder("scrape", move |link: UnresolvedLink| {
        let scraper = Arc::clone(&scraper);
        async move { Ok(scraper.scrape(link).await) }
    })
    .link_to(stub.input().flatten(), Option::is_some)
    .link_to(Arc::clone(&drops), |_| true)
    .spawn();

    for name in ["a.html", "b.html", "c.html"] {
        scrape.submit(link(&server, name, 1)).unwrap();
    }
    scrape.complete();
    stub.await_completion().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(drops.discarded(), 2);
    let c = counters.snapshot();
    assert_eq!((c.skipped, c.errored), (1, 1));
}

#[tokio::test]
async fn two_items_with_the_same_media_download_once() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    mount_page(&server, "a.html", page("image/same.jpg")).await;
    mount_page(&server, "b.html", page("image/SAME.jpg")).await;
    mount_image(&server, "same.jpg", 1).await;
    mount_image(&server, "SAME.jpg", 0).await;

    let links = vec![link(&server, "a.html", 1), link(&server, "b.html", 2)];
    let mut config = config(&server, &dir);
    config.scrape_parallelism = Parallelism::Limited(1);
    config.fetch_parallelism = Parallelism::Limited(1);
    let (pipeline, sink) = pipeline(config, links);

    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.counters.fetched, 1);
    assert_eq!(summary.counters.skipped, 1);
    assert_eq!(sink.count(Status::DupImage), 1);
    assert!(dir.path().join("pics").join("same.jpg").exists());
}

#[tokio::test]
async fn overwrite_refetches_existing_files() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    mount_page(&server, "a.html", page("image/a.jpg")).await;
    mount_image(&server, "a.jpg", 1).await;

    let pics = dir.path().join("pics");
    std::fs::create_dir_all(&pics).unwrap();
    std::fs::write(pics.join("a.jpg"), b"stale").unwrap();

    let mut config = config(&server, &dir);
    config.overwrite_all = true;
    let (pipeline, _sink) = pipeline(config, vec![link(&server, "a.html", 1)]);

    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.counters.fetched, 1);
    assert_eq!(std::fs::read(pics.join("a.jpg")).unwrap(), b"a.jpg");
}

#[tokio::test]
async fn listing_failure_stops_before_any_scrape() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let sink = Arc::new(MemorySink::new());
    let pipeline = Pipeline::new(config(&server, &dir), sink.clone())
        .unwrap()
        .with_lister(Arc::new(FailingLister));

    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, RunError::Listing(_)));
    assert_eq!(sink.count(Status::BadGetUrls), 1);
    assert_eq!(sink.count(Status::Scraping), 0);
    assert_eq!(sink.count(Status::Finished), 0);
}

#[tokio::test]
async fn cancel_before_run_is_reported_as_cancelled() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    let (pipeline, sink) = pipeline(config(&server, &dir), vec![link(&server, "a.html", 1)]);

    pipeline.cancel_token().cancel();
    let err = pipeline.run().await.unwrap_err();

    assert!(matches!(err, RunError::Cancelled { .. }));
    assert_eq!(
        sink.messages(Status::Cancelled),
        vec!["The process was manually cancelled!".to_string()]
    );
}

#[tokio::test]
async fn cancel_mid_run_aborts_in_flight_work() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/apod/slow.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(page("image/slow.jpg"))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let mut config = config(&server, &dir);
    config.request_timeout = Duration::from_secs(60);
    let links = (1..=4).map(|d| link(&server, "slow.html", d)).collect();
    let (pipeline, sink) = pipeline(config, links);

    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });

    let err = tokio::time::timeout(Duration::from_secs(5), pipeline.run())
        .await
        .expect("cancellation should be prompt")
        .unwrap_err();

    match err {
        RunError::Cancelled { summary } => {
            assert_eq!(summary.queued, 4);
            assert_eq!(summary.counters.total(), 0);
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(sink.count(Status::Cancelled), 1);
    assert_eq!(sink.count(Status::Finished), 0);
}

#[tokio::test]
async fn address_without_file_name_is_counted_as_error() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    mount_page(&server, "a.html", page("image/")).await;

    let (pipeline, sink) = pipeline(config(&server, &dir), vec![link(&server, "a.html", 1)]);
    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.counters.errored, 1);
    assert_eq!(sink.count(Status::BadFetch), 1);
}

#[tokio::test]
async fn status_lines_follow_the_item_lifecycle() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    mount_page(&server, "a.html", page("image/Saturn.JPG")).await;
    mount_image(&server, "Saturn.JPG", 1).await;

    let (pipeline, sink) = pipeline(config(&server, &dir), vec![link(&server, "a.html", 23)]);
    pipeline.run().await.unwrap();

    let page_url = format!("{}/apod/a.html", server.uri());
    assert_eq!(sink.messages(Status::Scraping), vec![page_url.clone()]);
    assert_eq!(sink.messages(Status::Scraped), vec![page_url]);
    assert_eq!(
        sink.messages(Status::Fetching),
        vec!["08/23/2013 - saturn.jpg".to_string()]
    );
    assert_eq!(
        sink.messages(Status::Fetched),
        vec!["08/23/2013 - saturn.jpg".to_string()]
    );
    let info = sink.messages(Status::Info);
    assert_eq!(info[1], "Parsed 1 URIs");
    assert_eq!(info[2], "Queued 1 images to be downloaded");
    let finished = sink.messages(Status::Finished);
    assert_eq!(finished.len(), 1);
    assert!(finished[0].starts_with("Fetched: 1, Skipped: 0, Errors: 0, Seconds: "));
}

#[tokio::test]
async fn scraper_classifies_missing_media_and_timeouts() {
    let server = MockServer::start().await;
    let dir = tempdir().unwrap();
    mount_page(&server, "video.html", "<html>video only</html>".into()).await;
    Mock::given(method("GET"))
        .and(path("/apod/slow.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(page("image/slow.jpg"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let mut config = config(&server, &dir);
    config.request_timeout = Duration::from_millis(300);
    let counters = Arc::new(RunCounters::default());
    let sink = Arc::new(MemorySink::new());
    let scraper = Scraper::new(
        HttpClient::new(&config).unwrap(),
        MediaExtractor::new(&config.media_pattern).unwrap(),
        config.base_url().unwrap(),
        Arc::clone(&counters),
        sink.clone(),
    );

    let video = link(&server, "video.html", 1);
    assert!(scraper.scrape(video.clone()).await.is_none());
    assert_eq!(sink.messages(Status::NoImage), vec![video.source.to_string()]);

    assert!(scraper.scrape(link(&server, "slow.html", 2)).await.is_none());
    let bad = sink.messages(Status::BadScrape);
    assert_eq!(bad.len(), 1);
    assert!(bad[0].contains("timed out"), "unexpected message: {}", bad[0]);

    let c = counters.snapshot();
    assert_eq!((c.fetched, c.skipped, c.errored), (0, 1, 1));
}
