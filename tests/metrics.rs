// tests/metrics.rs
mod common;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use common::{source, t0, Pages};
use source_digest::config::CrawlSettings;
use source_digest::crawl::run_crawl;
use source_digest::metrics::Metrics;
use source_digest::store::{MemoryStore, Store};

#[tokio::test]
async fn metrics_endpoint_contains_expected_series() {
    // this binary owns the global recorder
    let metrics = Metrics::init(5).expect("install recorder");

    let store = MemoryStore::new();
    let fetcher = Pages::new(&[("https://m.test/", r#"<a href="/a/1">1</a>"#)]);
    let src = store
        .upsert_source(source(1, "https://m.test/", r#"href="(/a/\d+)""#))
        .await
        .unwrap();
    let settings = CrawlSettings {
        enrich_details: false,
        ..Default::default()
    };
    let out = run_crawl(&store, fetcher.as_ref(), &src, &settings, t0()).await;
    assert!(out.is_ok());

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    assert!(text.contains("scheduler_tick_secs 5"), "{text}");
    assert!(text.contains("crawl_runs_total{status=\"ok\"} 1"), "{text}");
    assert!(text.contains("crawl_new_items_total 1"), "{text}");
}
