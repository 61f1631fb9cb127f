// tests/crawl_dedup.rs
mod common;

use std::sync::Arc;

use common::{source, t0, Pages};
use source_digest::config::CrawlSettings;
use source_digest::crawl::run_crawl;
use source_digest::error::{CrawlError, PatternInvalid};
use source_digest::model::LastRunStatus;
use source_digest::store::{MemoryStore, Store};

const LISTING_URL: &str = "https://news.test/list/";
const PATTERN: &str = r#"href="(/story/\d+[^"]*)""#;

const LISTING: &str = r#"
<ul>
  <li><a href="/story/1">One</a></li>
  <li><a href="/story/2?utm_source=feed">Two</a></li>
  <li><a href="/story/2">Two again</a></li>
  <li><a href="/story/3#comments">Three</a></li>
</ul>
"#;

fn settings() -> CrawlSettings {
    CrawlSettings {
        enrich_details: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn unchanged_page_admits_nothing_on_second_crawl() {
    let store = MemoryStore::new();
    let fetcher = Pages::new(&[(LISTING_URL, LISTING)]);
    let src = store.upsert_source(source(1, LISTING_URL, PATTERN)).await.unwrap();

    let first = run_crawl(&store, fetcher.as_ref(), &src, &settings(), t0()).await;
    assert!(first.is_ok(), "{:?}", first.error);
    assert_eq!(first.candidates, 4);
    // tracking params and fragments collapse onto the same key
    assert_eq!(first.new_item_count, 3);

    let second = run_crawl(&store, fetcher.as_ref(), &src, &settings(), t0()).await;
    assert!(second.is_ok());
    assert_eq!(second.new_item_count, 0);
    assert_eq!(store.item_count(), 3);
}

#[tokio::test]
async fn new_link_on_later_crawl_is_the_only_admission() {
    let store = MemoryStore::new();
    let fetcher = Pages::new(&[(LISTING_URL, LISTING)]);
    let src = store.upsert_source(source(1, LISTING_URL, PATTERN)).await.unwrap();
    run_crawl(&store, fetcher.as_ref(), &src, &settings(), t0()).await;

    fetcher.set(
        LISTING_URL,
        &format!("{LISTING}<a href=\"/story/4\">Four</a>"),
    );
    let out = run_crawl(&store, fetcher.as_ref(), &src, &settings(), t0()).await;
    assert_eq!(out.new_item_count, 1);

    let items = store
        .items_for_sources(&[1], t0() - chrono::Duration::hours(1), t0())
        .await
        .unwrap();
    assert!(items.iter().any(|i| i.url == "https://news.test/story/4"));
}

#[tokio::test]
async fn same_link_is_new_for_each_source() {
    let store = MemoryStore::new();
    let fetcher = Pages::new(&[(LISTING_URL, LISTING)]);
    let a = store.upsert_source(source(1, LISTING_URL, PATTERN)).await.unwrap();
    let b = store.upsert_source(source(2, LISTING_URL, PATTERN)).await.unwrap();

    let oa = run_crawl(&store, fetcher.as_ref(), &a, &settings(), t0()).await;
    let ob = run_crawl(&store, fetcher.as_ref(), &b, &settings(), t0()).await;
    assert_eq!(oa.new_item_count, 3);
    assert_eq!(ob.new_item_count, 3);
    assert_eq!(store.item_count(), 6);
}

#[tokio::test]
async fn fetch_failure_is_recorded_and_stores_nothing() {
    let store = MemoryStore::new();
    let fetcher = Pages::new(&[]);
    let src = store.upsert_source(source(1, LISTING_URL, PATTERN)).await.unwrap();

    let out = run_crawl(&store, fetcher.as_ref(), &src, &settings(), t0()).await;
    assert!(matches!(out.error, Some(CrawlError::Fetch(_))));
    assert_eq!(store.item_count(), 0);

    let after = store.get_source(1).await.unwrap();
    assert_eq!(after.last_run_status, Some(LastRunStatus::Error));
    assert!(after.last_error.unwrap().contains("404"));
}

#[tokio::test]
async fn missing_pattern_is_a_pattern_error() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = Pages::new(&[(LISTING_URL, LISTING)]);
    let mut s = source(1, LISTING_URL, PATTERN);
    s.pattern = None;
    let src = store.upsert_source(s).await.unwrap();

    let out = run_crawl(store.as_ref(), fetcher.as_ref(), &src, &settings(), t0()).await;
    assert_eq!(
        out.error,
        Some(CrawlError::Pattern(PatternInvalid::Missing))
    );
}

#[tokio::test]
async fn detail_pages_fill_title_and_snippet() {
    let store = MemoryStore::new();
    let fetcher = Pages::new(&[
        (LISTING_URL, r#"<a href="/story/9">x</a>"#),
        (
            "https://news.test/story/9",
            r#"<html><head><title>Rates held steady</title>
               <meta name="description" content="The central bank left rates unchanged."></head>
               <body><p>Body text.</p></body></html>"#,
        ),
    ]);
    let src = store.upsert_source(source(1, LISTING_URL, PATTERN)).await.unwrap();
    let settings = CrawlSettings {
        enrich_details: true,
        ..Default::default()
    };

    let out = run_crawl(&store, fetcher.as_ref(), &src, &settings, t0()).await;
    assert_eq!(out.new_item_count, 1);
    assert_eq!(fetcher.calls_to("https://news.test/story/9"), 1);

    let items = store
        .items_for_sources(&[1], t0() - chrono::Duration::hours(1), t0())
        .await
        .unwrap();
    assert_eq!(items[0].title, "Rates held steady");
    assert!(items[0].snippet.contains("rates unchanged"));
}
