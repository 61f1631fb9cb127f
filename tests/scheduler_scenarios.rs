// tests/scheduler_scenarios.rs
mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use common::{report, source, t0, FixedClock, Pages, Parts, ScriptedLlm};
use source_digest::model::{Phase, ScheduleKey, ScheduleState};
use source_digest::scheduler::dispatch;
use source_digest::store::{MemoryStore, Store};
use source_digest::Scheduler;

const A_URL: &str = "https://a.test/list";
const B_URL: &str = "https://b.test/list";
const LISTING: &str = r#"<a href="/p/1">1</a><a href="/p/2">2</a>"#;
const PATTERN: &str = r#"href="(/p/\d+)""#;

async fn add_source(store: &MemoryStore, id: u64, url: &str, last_run_secs_ago: i64) {
    let mut s = source(id, url, PATTERN);
    s.interval_secs = 60;
    s.schedule = ScheduleState {
        phase: Phase::Idle,
        last_run_at: Some(t0() - Duration::seconds(last_run_secs_ago)),
    };
    store.upsert_source(s).await.unwrap();
}

#[tokio::test]
async fn only_the_due_source_runs_and_never_twice_while_running() {
    let store = Arc::new(MemoryStore::new());
    add_source(&store, 1, A_URL, 30).await;
    add_source(&store, 2, B_URL, 90).await;

    // B's crawl blocks inside the fetch until released
    let fetcher = Pages::gated(&[(A_URL, LISTING), (B_URL, LISTING)]);
    let mut parts = Parts::new(Arc::clone(&store));
    parts.fetcher = fetcher.clone();
    let scheduler = Scheduler::new(parts.build(), StdDuration::from_secs(5));

    let first = scheduler.tick().await;
    assert_eq!(first.dispatched, vec![ScheduleKey::Source(2)]);

    for _ in 0..3 {
        let again = scheduler.tick().await;
        assert!(again.dispatched.is_empty());
        assert_eq!(again.skipped_running, 1);
    }
    assert!(store.get_source(2).await.unwrap().schedule.is_running());

    fetcher.release();
    first.join().await;

    assert_eq!(fetcher.calls_to(B_URL), 1);
    assert_eq!(fetcher.calls_to(A_URL), 0);

    let b = store.get_source(2).await.unwrap();
    assert_eq!(b.schedule.phase, Phase::Idle);
    assert_eq!(b.schedule.last_run_at, Some(t0()));
    assert_eq!(store.item_count(), 2);

    let a = store.get_source(1).await.unwrap();
    assert_eq!(a.schedule.last_run_at, Some(t0() - Duration::seconds(30)));
}

#[tokio::test]
async fn missed_intervals_collapse_into_one_run() {
    let store = Arc::new(MemoryStore::new());
    // ten intervals overdue
    add_source(&store, 1, A_URL, 600).await;
    let fetcher = Pages::new(&[(A_URL, LISTING)]);
    let clock = FixedClock::new(t0());
    let mut parts = Parts::new(Arc::clone(&store));
    parts.fetcher = fetcher.clone();
    parts.clock = clock.clone();
    let scheduler = Scheduler::new(parts.build(), StdDuration::from_secs(5));

    let tick = scheduler.tick().await;
    assert_eq!(tick.dispatched.len(), 1);
    tick.join().await;

    // completion resets the interval; nothing is due until 60s later
    clock.advance(30);
    assert!(scheduler.tick().await.dispatched.is_empty());
    clock.advance(30);
    let later = scheduler.tick().await;
    assert_eq!(later.dispatched, vec![ScheduleKey::Source(1)]);
    later.join().await;
    assert_eq!(fetcher.calls_to(A_URL), 2);
}

#[tokio::test]
async fn disabled_entities_are_never_dispatched() {
    let store = Arc::new(MemoryStore::new());
    let mut s = source(1, A_URL, PATTERN);
    s.enabled = false;
    store.upsert_source(s).await.unwrap();
    let mut r = report(1, &[1], &[]);
    r.enabled = false;
    store.upsert_report(r).await.unwrap();

    let scheduler = Scheduler::new(Parts::new(Arc::clone(&store)).build(), StdDuration::from_secs(5));
    let tick = scheduler.tick().await;
    assert!(tick.dispatched.is_empty());
    assert_eq!(tick.skipped_running, 0);
}

#[tokio::test]
async fn due_report_runs_once_and_records_a_run() {
    let store = Arc::new(MemoryStore::new());
    store.upsert_source(source(1, A_URL, PATTERN)).await.unwrap();
    let mut s = store.get_source(1).await.unwrap();
    s.enabled = false;
    store.upsert_source(s).await.unwrap();
    store.upsert_report(report(7, &[1], &[])).await.unwrap();

    let mut parts = Parts::new(Arc::clone(&store));
    parts.llm = ScriptedLlm::fixed("- unused");
    let scheduler = Scheduler::new(parts.build(), StdDuration::from_secs(5));

    let tick = scheduler.tick().await;
    assert_eq!(tick.dispatched, vec![ScheduleKey::Report(7)]);
    tick.join().await;

    let runs = store.list_runs(7).await.unwrap();
    assert_eq!(runs.len(), 1);
    let cfg = store.get_report(7).await.unwrap();
    assert_eq!(cfg.schedule.last_run_at, Some(t0()));
    assert!(scheduler.tick().await.dispatched.is_empty());
}

#[tokio::test]
async fn manual_trigger_loses_to_a_running_entity() {
    let store = Arc::new(MemoryStore::new());
    add_source(&store, 1, A_URL, 90).await;
    let fetcher = Pages::gated(&[(A_URL, LISTING)]);
    let mut parts = Parts::new(Arc::clone(&store));
    parts.fetcher = fetcher.clone();
    let p = parts.build();

    let first = dispatch(&p, ScheduleKey::Source(1)).await.unwrap();
    assert!(first.is_some());
    assert!(dispatch(&p, ScheduleKey::Source(1)).await.unwrap().is_none());

    fetcher.release();
    if let Some(h) = first {
        h.await.unwrap();
    }
    assert!(dispatch(&p, ScheduleKey::Source(1)).await.unwrap().is_some());
}
