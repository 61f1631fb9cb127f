use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and publish the configured tick.
    pub fn init(tick_secs: u64) -> anyhow::Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;

        ensure_metrics_described();
        gauge!("scheduler_tick_secs").set(tick_secs as f64);

        Ok(Self { handle })
    }

    /// Handle backed by a recorder that is not installed globally (tests, previews).
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_gauge!("scheduler_tick_secs", "Configured scheduler tick in seconds.");
        describe_gauge!("scheduler_last_tick_ts", "Unix ts of the last scheduler tick.");
        describe_counter!(
            "scheduler_dispatch_total",
            "Executors spawned by the scheduler, by kind."
        );
        describe_counter!(
            "scheduler_skipped_running_total",
            "Due entities skipped because a run was still in progress."
        );
        describe_counter!("crawl_runs_total", "Crawl runs by outcome status.");
        describe_counter!("crawl_new_items_total", "Items admitted by the dedup store.");
        describe_histogram!("crawl_duration_ms", "Crawl wall time in milliseconds.");
        describe_counter!("report_runs_total", "Report runs by mode and terminal status.");
        describe_histogram!("report_duration_ms", "Report generation time in milliseconds.");
        describe_counter!(
            "research_questions_total",
            "Deep-research questions by answered/inconclusive."
        );
        describe_counter!("delivery_attempts_total", "Webhook POST attempts by platform.");
        describe_counter!(
            "delivery_outcomes_total",
            "Final per-destination delivery outcomes by platform."
        );
    });
}
