// src/scheduler.rs
//! Recurring due-checks for sources and report configs.
//!
//! Each tick looks at every enabled entity; a due, idle one is moved to `running`
//! through the store's compare-and-set and its executor is spawned. The executor puts
//! it back to idle with `last_run_at` set to its completion time. Missed intervals are
//! not backfilled and a running entity is never started twice.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::crawl::run_crawl;
use crate::error::StoreError;
use crate::metrics::ensure_metrics_described;
use crate::model::ScheduleKey;
use crate::pipeline::Pipeline;
use crate::report::run_report;

/// What one tick did. Handles let callers (and tests) wait for the spawned executors.
#[derive(Debug, Default)]
pub struct TickReport {
    pub dispatched: Vec<ScheduleKey>,
    pub skipped_running: usize,
    pub handles: Vec<JoinHandle<()>>,
}

impl TickReport {
    /// Wait for every executor spawned by this tick.
    pub async fn join(self) {
        for h in self.handles {
            if let Err(e) = h.await {
                tracing::error!(target: "scheduler", error = %e, "executor task panicked");
            }
        }
    }
}

#[derive(Clone)]
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, tick: Duration) -> Self {
        Self { pipeline, tick }
    }

    /// Evaluate every enabled source and report config once.
    pub async fn tick(&self) -> TickReport {
        ensure_metrics_described();
        let now = self.pipeline.now();
        gauge!("scheduler_last_tick_ts").set(now.timestamp() as f64);

        let mut due: Vec<(ScheduleKey, bool)> = Vec::new();
        match self.pipeline.store.list_sources().await {
            Ok(sources) => due.extend(
                sources
                    .iter()
                    .filter(|s| s.enabled && s.schedule.is_due(s.interval(), now))
                    .map(|s| (ScheduleKey::Source(s.id), s.schedule.is_running())),
            ),
            Err(e) => tracing::warn!(target: "scheduler", error = %e, "listing sources failed"),
        }
        match self.pipeline.store.list_reports().await {
            Ok(reports) => due.extend(
                reports
                    .iter()
                    .filter(|r| r.enabled && r.schedule.is_due(r.interval(), now))
                    .map(|r| (ScheduleKey::Report(r.id), r.schedule.is_running())),
            ),
            Err(e) => tracing::warn!(target: "scheduler", error = %e, "listing reports failed"),
        }

        let mut report = TickReport::default();
        for (key, running) in due {
            if running {
                report.skipped_running += 1;
                counter!("scheduler_skipped_running_total").increment(1);
                continue;
            }
            match dispatch(&self.pipeline, key).await {
                Ok(Some(handle)) => {
                    report.dispatched.push(key);
                    report.handles.push(handle);
                }
                // lost the race to another tick or a run-now trigger
                Ok(None) => report.skipped_running += 1,
                Err(e) => tracing::warn!(target: "scheduler", %key, error = %e, "dispatch failed"),
            }
        }
        if !report.dispatched.is_empty() {
            tracing::debug!(target: "scheduler", dispatched = report.dispatched.len(), "tick");
        }
        report
    }

    /// Run the tick loop forever on the configured interval.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(target: "scheduler", tick_secs = self.tick.as_secs(), "scheduler started");
            loop {
                ticker.tick().await;
                // executors run detached; the loop never waits on them
                let _ = self.tick().await;
            }
        })
    }
}

/// Claim `key` (idle -> running) and spawn its executor. `Ok(None)` when it is
/// already running. Shared by the tick loop and the run-now admin actions.
pub async fn dispatch(
    pipeline: &Arc<Pipeline>,
    key: ScheduleKey,
) -> Result<Option<JoinHandle<()>>, StoreError> {
    if !pipeline.store.try_begin(key).await? {
        return Ok(None);
    }
    let kind = match key {
        ScheduleKey::Source(_) => "crawl",
        ScheduleKey::Report(_) => "report",
    };
    counter!("scheduler_dispatch_total", "kind" => kind).increment(1);

    let p = Arc::clone(pipeline);
    Ok(Some(tokio::spawn(async move {
        execute(&p, key).await;
        let done: DateTime<Utc> = p.now();
        if let Err(e) = p.store.finish(key, done).await {
            tracing::error!(target: "scheduler", %key, error = %e, "could not return entity to idle");
        }
    })))
}

async fn execute(p: &Pipeline, key: ScheduleKey) {
    match key {
        ScheduleKey::Source(id) => match p.store.get_source(id).await {
            Ok(source) => {
                run_crawl(
                    p.store.as_ref(),
                    p.fetcher.as_ref(),
                    &source,
                    &p.settings.crawl,
                    p.now(),
                )
                .await;
            }
            Err(e) => tracing::warn!(target: "scheduler", %key, error = %e, "source vanished"),
        },
        ScheduleKey::Report(id) => match p.store.get_report(id).await {
            Ok(config) => {
                if let Err(e) = run_report(p, &config).await {
                    tracing::error!(target: "scheduler", %key, error = %e, "report run could not be recorded");
                }
            }
            Err(e) => tracing::warn!(target: "scheduler", %key, error = %e, "report config vanished"),
        },
    }
}
