// src/store/mod.rs
//! Persistence capability used by every pipeline stage.
//!
//! Two operations carry the concurrency guarantees the rest of the crate leans on:
//! `insert_item_if_new` (atomic check-and-insert on `(source_id, dedup_key)`) and
//! `try_begin` (compare-and-set of an entity's schedule phase from idle to running).

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{
    CapturedItem, Destination, DestinationId, LastRunStatus, NewItem, ReportConfig,
    ReportConfigId, ReportRun, RunId, ScheduleKey, Source, SourceId,
};

pub use memory::MemoryStore;

#[async_trait]
pub trait Store: Send + Sync {
    // --- sources ---
    async fn list_sources(&self) -> Result<Vec<Source>, StoreError>;
    async fn get_source(&self, id: SourceId) -> Result<Source, StoreError>;
    /// Insert (id 0 assigns a fresh id) or replace the definition, keeping run state.
    async fn upsert_source(&self, source: Source) -> Result<Source, StoreError>;
    /// Fails with `Referenced` while any report config points at the source.
    async fn delete_source(&self, id: SourceId) -> Result<(), StoreError>;
    async fn record_crawl_outcome(
        &self,
        id: SourceId,
        status: LastRunStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    // --- items ---
    async fn contains_item(&self, source_id: SourceId, dedup_key: &str) -> Result<bool, StoreError>;
    /// Single atomic check-and-insert. `None` when the key already exists for the source.
    async fn insert_item_if_new(&self, item: NewItem) -> Result<Option<CapturedItem>, StoreError>;
    /// Items of the given sources captured within `[since, until]`, newest first.
    async fn items_for_sources(
        &self,
        source_ids: &[SourceId],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CapturedItem>, StoreError>;

    // --- report configs & destinations ---
    async fn list_reports(&self) -> Result<Vec<ReportConfig>, StoreError>;
    async fn get_report(&self, id: ReportConfigId) -> Result<ReportConfig, StoreError>;
    async fn upsert_report(&self, report: ReportConfig) -> Result<ReportConfig, StoreError>;
    async fn list_destinations(&self) -> Result<Vec<Destination>, StoreError>;
    async fn get_destination(&self, id: DestinationId) -> Result<Destination, StoreError>;
    async fn upsert_destination(&self, dest: Destination) -> Result<Destination, StoreError>;

    // --- runs ---
    /// Allocate and persist a new `pending` run.
    async fn create_run(
        &self,
        config_id: ReportConfigId,
        now: DateTime<Utc>,
    ) -> Result<ReportRun, StoreError>;
    async fn save_run(&self, run: &ReportRun) -> Result<(), StoreError>;
    async fn get_run(&self, id: RunId) -> Result<ReportRun, StoreError>;
    /// Runs of one config, newest first.
    async fn list_runs(&self, config_id: ReportConfigId) -> Result<Vec<ReportRun>, StoreError>;

    // --- schedule gate ---
    /// CAS `idle -> running`. `Ok(false)` when the entity is already running.
    async fn try_begin(&self, key: ScheduleKey) -> Result<bool, StoreError>;
    /// `running -> idle` with `last_run_at = at`.
    async fn finish(&self, key: ScheduleKey, at: DateTime<Utc>) -> Result<(), StoreError>;
}
