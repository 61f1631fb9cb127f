// src/store/memory.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::Store;
use crate::config::AppConfig;
use crate::error::StoreError;
use crate::model::{
    CapturedItem, Destination, DestinationId, ItemId, LastRunStatus, NewItem, Phase,
    ReportConfig, ReportConfigId, ReportRun, RunId, ScheduleKey, ScheduleState, Source, SourceId,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    sources: BTreeMap<SourceId, Source>,
    reports: BTreeMap<ReportConfigId, ReportConfig>,
    destinations: BTreeMap<DestinationId, Destination>,
    items: Vec<CapturedItem>,
    runs: BTreeMap<RunId, ReportRun>,
    next_item_id: ItemId,
    next_run_id: RunId,
    /// `(source_id, dedup_key)` index, rebuilt from `items` on load.
    #[serde(skip)]
    item_keys: HashSet<(SourceId, String)>,
}

impl Tables {
    fn rebuild_index(&mut self) {
        self.item_keys = self
            .items
            .iter()
            .map(|i| (i.source_id, i.dedup_key.clone()))
            .collect();
    }

    /// Crash recovery: nothing can still be running right after load.
    fn reset_running(&mut self) -> usize {
        let mut reset = 0;
        let phases = self
            .sources
            .values_mut()
            .map(|s| &mut s.schedule)
            .chain(self.reports.values_mut().map(|r| &mut r.schedule));
        for st in phases {
            if st.phase == Phase::Running {
                st.phase = Phase::Idle;
                reset += 1;
            }
        }
        reset
    }

    fn schedule_mut(&mut self, key: ScheduleKey) -> Result<&mut ScheduleState, StoreError> {
        match key {
            ScheduleKey::Source(id) => self
                .sources
                .get_mut(&id)
                .map(|s| &mut s.schedule)
                .ok_or(StoreError::NotFound { kind: "source", id }),
            ScheduleKey::Report(id) => self
                .reports
                .get_mut(&id)
                .map(|r| &mut r.schedule)
                .ok_or(StoreError::NotFound { kind: "report", id }),
        }
    }
}

fn next_key<V>(map: &BTreeMap<u64, V>) -> u64 {
    map.keys().next_back().copied().unwrap_or(0) + 1
}

/// In-process store with optional JSON snapshot persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by `path`. A missing file starts empty; a present one is loaded
    /// and any `running` phase left behind by a crash is reset to idle.
    pub fn open(path: Option<PathBuf>) -> Result<Self, StoreError> {
        let mut tables = match path.as_deref() {
            Some(p) if p.exists() => load_snapshot(p)?,
            _ => Tables::default(),
        };
        tables.rebuild_index();
        let reset = tables.reset_running();
        if reset > 0 {
            tracing::warn!(target: "store", reset, "reset stale running phases after restart");
        }
        Ok(Self {
            tables: Mutex::new(tables),
            snapshot_path: path,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Apply the sources/reports/destinations declared in config, keyed by their
    /// configured ids (validated non-zero and unique at load). Definitions are
    /// overwritten; schedule state and last-run status survive from the snapshot.
    pub fn seed_from_config(&self, cfg: &AppConfig) -> Result<(), StoreError> {
        let mut t = self.lock()?;
        for s in &cfg.sources {
            let mut s = s.clone();
            if let Some(prev) = t.sources.get(&s.id) {
                s.schedule = prev.schedule.clone();
                s.last_run_status = prev.last_run_status;
                s.last_error = prev.last_error.clone();
            }
            t.sources.insert(s.id, s);
        }
        for d in &cfg.destinations {
            let mut d = d.clone();
            t.destinations.insert(d.id, d);
        }
        for r in &cfg.reports {
            let mut r = r.clone();
            if let Some(prev) = t.reports.get(&r.id) {
                r.schedule = prev.schedule.clone();
            }
            t.reports.insert(r.id, r);
        }
        tracing::info!(
            target: "store",
            sources = t.sources.len(),
            reports = t.reports.len(),
            destinations = t.destinations.len(),
            "seeded from config"
        );
        Ok(())
    }

    /// Write the snapshot (tmp file + rename). No-op without a snapshot path.
    pub fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = self.snapshot_path.as_deref() else {
            return Ok(());
        };
        let json = {
            let t = self.lock()?;
            serde_json::to_vec(&*t).map_err(|e| StoreError::Snapshot(e.to_string()))?
        };
        write_atomic(path, &json).map_err(|e| StoreError::Snapshot(e.to_string()))
    }

    pub fn item_count(&self) -> usize {
        self.lock().map(|t| t.items.len()).unwrap_or(0)
    }
}

fn load_snapshot(path: &Path) -> Result<Tables, StoreError> {
    let s = fs::read_to_string(path).map_err(|e| StoreError::Snapshot(e.to_string()))?;
    serde_json::from_str(&s).map_err(|e| StoreError::Snapshot(e.to_string()))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    fs::rename(tmp, path)
}

/// Periodic snapshot task. Wire this from app startup.
pub fn spawn_flusher(store: Arc<MemoryStore>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = store.flush() {
                tracing::warn!(target: "store", error = %e, "snapshot flush failed");
            }
        }
    })
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_sources(&self) -> Result<Vec<Source>, StoreError> {
        Ok(self.lock()?.sources.values().cloned().collect())
    }

    async fn get_source(&self, id: SourceId) -> Result<Source, StoreError> {
        self.lock()?
            .sources
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "source", id })
    }

    async fn upsert_source(&self, mut source: Source) -> Result<Source, StoreError> {
        let mut t = self.lock()?;
        if source.id == 0 {
            source.id = next_key(&t.sources);
        }
        if let Some(prev) = t.sources.get(&source.id) {
            source.schedule = prev.schedule.clone();
            source.last_run_status = prev.last_run_status;
            source.last_error = prev.last_error.clone();
        }
        t.sources.insert(source.id, source.clone());
        Ok(source)
    }

    async fn delete_source(&self, id: SourceId) -> Result<(), StoreError> {
        let mut t = self.lock()?;
        if t.reports.values().any(|r| r.source_ids.contains(&id)) {
            return Err(StoreError::Referenced(id));
        }
        t.sources
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { kind: "source", id })
    }

    async fn record_crawl_outcome(
        &self,
        id: SourceId,
        status: LastRunStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut t = self.lock()?;
        let s = t
            .sources
            .get_mut(&id)
            .ok_or(StoreError::NotFound { kind: "source", id })?;
        s.last_run_status = Some(status);
        s.last_error = error;
        Ok(())
    }

    async fn contains_item(&self, source_id: SourceId, dedup_key: &str) -> Result<bool, StoreError> {
        Ok(self
            .lock()?
            .item_keys
            .contains(&(source_id, dedup_key.to_string())))
    }

    async fn insert_item_if_new(&self, item: NewItem) -> Result<Option<CapturedItem>, StoreError> {
        let mut t = self.lock()?;
        if !t.item_keys.insert((item.source_id, item.dedup_key.clone())) {
            return Ok(None);
        }
        t.next_item_id += 1;
        let stored = item.into_item(t.next_item_id);
        t.items.push(stored.clone());
        Ok(Some(stored))
    }

    async fn items_for_sources(
        &self,
        source_ids: &[SourceId],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CapturedItem>, StoreError> {
        let t = self.lock()?;
        let mut out: Vec<CapturedItem> = t
            .items
            .iter()
            .filter(|i| source_ids.contains(&i.source_id))
            .filter(|i| i.captured_at >= since && i.captured_at <= until)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.captured_at.cmp(&a.captured_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn list_reports(&self) -> Result<Vec<ReportConfig>, StoreError> {
        Ok(self.lock()?.reports.values().cloned().collect())
    }

    async fn get_report(&self, id: ReportConfigId) -> Result<ReportConfig, StoreError> {
        self.lock()?
            .reports
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "report", id })
    }

    async fn upsert_report(&self, mut report: ReportConfig) -> Result<ReportConfig, StoreError> {
        let mut t = self.lock()?;
        if report.id == 0 {
            report.id = next_key(&t.reports);
        }
        if let Some(prev) = t.reports.get(&report.id) {
            report.schedule = prev.schedule.clone();
        }
        t.reports.insert(report.id, report.clone());
        Ok(report)
    }

    async fn list_destinations(&self) -> Result<Vec<Destination>, StoreError> {
        Ok(self.lock()?.destinations.values().cloned().collect())
    }

    async fn get_destination(&self, id: DestinationId) -> Result<Destination, StoreError> {
        self.lock()?
            .destinations
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: "destination",
                id,
            })
    }

    async fn upsert_destination(&self, mut dest: Destination) -> Result<Destination, StoreError> {
        let mut t = self.lock()?;
        if dest.id == 0 {
            dest.id = next_key(&t.destinations);
        }
        t.destinations.insert(dest.id, dest.clone());
        Ok(dest)
    }

    async fn create_run(
        &self,
        config_id: ReportConfigId,
        now: DateTime<Utc>,
    ) -> Result<ReportRun, StoreError> {
        let mut t = self.lock()?;
        t.next_run_id += 1;
        let run = ReportRun::new(t.next_run_id, config_id, now);
        t.runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn save_run(&self, run: &ReportRun) -> Result<(), StoreError> {
        let mut t = self.lock()?;
        if !t.runs.contains_key(&run.id) {
            return Err(StoreError::NotFound {
                kind: "run",
                id: run.id,
            });
        }
        t.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> Result<ReportRun, StoreError> {
        self.lock()?
            .runs
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "run", id })
    }

    async fn list_runs(&self, config_id: ReportConfigId) -> Result<Vec<ReportRun>, StoreError> {
        Ok(self
            .lock()?
            .runs
            .values()
            .rev()
            .filter(|r| r.config_id == config_id)
            .cloned()
            .collect())
    }

    async fn try_begin(&self, key: ScheduleKey) -> Result<bool, StoreError> {
        let mut t = self.lock()?;
        let st = t.schedule_mut(key)?;
        if st.phase == Phase::Running {
            return Ok(false);
        }
        st.phase = Phase::Running;
        Ok(true)
    }

    async fn finish(&self, key: ScheduleKey, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut t = self.lock()?;
        let st = t.schedule_mut(key)?;
        st.phase = Phase::Idle;
        st.last_run_at = Some(at);
        Ok(())
    }
}
