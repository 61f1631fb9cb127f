// tests/report_store_failure.rs
mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{report, source, Parts};
use source_digest::error::StoreError;
use source_digest::model::{
    CapturedItem, Destination, DestinationId, LastRunStatus, NewItem, ReportConfig,
    ReportConfigId, ReportRun, RunId, RunStatus, ScheduleKey, Source, SourceId,
};
use source_digest::pipeline::Pipeline;
use source_digest::report::run_report;
use source_digest::store::{MemoryStore, Store};

/// Delegates to a `MemoryStore` but cannot answer window queries.
struct BrokenWindow(Arc<MemoryStore>);

#[async_trait]
impl Store for BrokenWindow {
    async fn list_sources(&self) -> Result<Vec<Source>, StoreError> {
        self.0.list_sources().await
    }
    async fn get_source(&self, id: SourceId) -> Result<Source, StoreError> {
        self.0.get_source(id).await
    }
    async fn upsert_source(&self, source: Source) -> Result<Source, StoreError> {
        self.0.upsert_source(source).await
    }
    async fn delete_source(&self, id: SourceId) -> Result<(), StoreError> {
        self.0.delete_source(id).await
    }
    async fn record_crawl_outcome(
        &self,
        id: SourceId,
        status: LastRunStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        self.0.record_crawl_outcome(id, status, error).await
    }
    async fn contains_item(&self, source_id: SourceId, dedup_key: &str) -> Result<bool, StoreError> {
        self.0.contains_item(source_id, dedup_key).await
    }
    async fn insert_item_if_new(&self, item: NewItem) -> Result<Option<CapturedItem>, StoreError> {
        self.0.insert_item_if_new(item).await
    }
    async fn items_for_sources(
        &self,
        _source_ids: &[SourceId],
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
    ) -> Result<Vec<CapturedItem>, StoreError> {
        Err(StoreError::Snapshot("disk unavailable".into()))
    }
    async fn list_reports(&self) -> Result<Vec<ReportConfig>, StoreError> {
        self.0.list_reports().await
    }
    async fn get_report(&self, id: ReportConfigId) -> Result<ReportConfig, StoreError> {
        self.0.get_report(id).await
    }
    async fn upsert_report(&self, report: ReportConfig) -> Result<ReportConfig, StoreError> {
        self.0.upsert_report(report).await
    }
    async fn list_destinations(&self) -> Result<Vec<Destination>, StoreError> {
        self.0.list_destinations().await
    }
    async fn get_destination(&self, id: DestinationId) -> Result<Destination, StoreError> {
        self.0.get_destination(id).await
    }
    async fn upsert_destination(&self, dest: Destination) -> Result<Destination, StoreError> {
        self.0.upsert_destination(dest).await
    }
    async fn create_run(
        &self,
        config_id: ReportConfigId,
        now: DateTime<Utc>,
    ) -> Result<ReportRun, StoreError> {
        self.0.create_run(config_id, now).await
    }
    async fn save_run(&self, run: &ReportRun) -> Result<(), StoreError> {
        self.0.save_run(run).await
    }
    async fn get_run(&self, id: RunId) -> Result<ReportRun, StoreError> {
        self.0.get_run(id).await
    }
    async fn list_runs(&self, config_id: ReportConfigId) -> Result<Vec<ReportRun>, StoreError> {
        self.0.list_runs(config_id).await
    }
    async fn try_begin(&self, key: ScheduleKey) -> Result<bool, StoreError> {
        self.0.try_begin(key).await
    }
    async fn finish(&self, key: ScheduleKey, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.0.finish(key, at).await
    }
}

#[tokio::test]
async fn store_failure_mid_run_leaves_a_failed_run_behind() {
    let inner = Arc::new(MemoryStore::new());
    inner
        .upsert_source(source(1, "https://site.test/", "x"))
        .await
        .unwrap();
    let cfg = inner.upsert_report(report(1, &[1], &[])).await.unwrap();

    let parts = Parts::new(Arc::clone(&inner));
    let p = Pipeline {
        store: Arc::new(BrokenWindow(Arc::clone(&inner))),
        fetcher: parts.fetcher,
        llm: parts.llm,
        search: parts.search,
        webhook: parts.webhook,
        clock: parts.clock,
        settings: parts.settings,
    };

    let err = run_report(&p, &cfg).await.unwrap_err();
    assert_eq!(err, StoreError::Snapshot("disk unavailable".into()));

    let runs = inner.list_runs(1).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status(), RunStatus::Failed);
    assert!(runs[0].content().is_none());
    assert!(runs[0].error().unwrap().contains("disk unavailable"));
    assert!(runs[0].finished_at.is_some());
}
