// src/model.rs
//! Persistent entities: sources, captured items, report configs, destinations, runs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RunStateError;

pub type SourceId = u64;
pub type ItemId = u64;
pub type ReportConfigId = u64;
pub type DestinationId = u64;
pub type RunId = u64;

fn default_true() -> bool {
    true
}

/// Intervals and windows beyond a century are treated as a century.
fn secs(v: u64) -> Duration {
    const CAP: u64 = 100 * 365 * 86_400;
    Duration::seconds(v.min(CAP) as i64)
}

/* ----------------------------
Scheduling state
---------------------------- */

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Running,
}

/// Per-entity scheduling record, stored next to the entity it drives.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleState {
    pub phase: Phase,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl ScheduleState {
    /// Due when never run, or when at least `interval` has elapsed since the last run.
    /// Missed intervals collapse into a single due state (no backfill).
    pub fn is_due(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        match self.last_run_at {
            None => true,
            Some(last) => now.signed_duration_since(last) >= interval,
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }
}

/// Identifies one timed entity for the scheduler's compare-and-set gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ScheduleKey {
    Source(SourceId),
    Report(ReportConfigId),
}

impl fmt::Display for ScheduleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleKey::Source(id) => write!(f, "source:{id}"),
            ScheduleKey::Report(id) => write!(f, "report:{id}"),
        }
    }
}

/* ----------------------------
Sources and items
---------------------------- */

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LastRunStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    #[serde(default)]
    pub id: SourceId,
    pub name: String,
    pub url: String,
    /// Regex applied to the listing page; group 1 (if any) is the candidate URL.
    #[serde(default)]
    pub pattern: Option<String>,
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub last_run_status: Option<LastRunStatus>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub schedule: ScheduleState,
}

impl Source {
    pub fn interval(&self) -> Duration {
        secs(self.interval_secs)
    }
}

/// A deduplicated item captured from a source's listing page. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapturedItem {
    pub id: ItemId,
    pub source_id: SourceId,
    pub url: String,
    pub dedup_key: String,
    pub title: String,
    pub snippet: String,
    pub captured_at: DateTime<Utc>,
}

/// Item data before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub source_id: SourceId,
    pub url: String,
    pub dedup_key: String,
    pub title: String,
    pub snippet: String,
    pub captured_at: DateTime<Utc>,
}

impl NewItem {
    pub(crate) fn into_item(self, id: ItemId) -> CapturedItem {
        CapturedItem {
            id,
            source_id: self.source_id,
            url: self.url,
            dedup_key: self.dedup_key,
            title: self.title,
            snippet: self.snippet,
            captured_at: self.captured_at,
        }
    }
}

/* ----------------------------
Reports and destinations
---------------------------- */

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportConfig {
    #[serde(default)]
    pub id: ReportConfigId,
    pub name: String,
    #[serde(default)]
    pub purpose: String,
    pub source_ids: Vec<SourceId>,
    /// OR-matched, case-insensitive against title + snippet. Empty = keep everything.
    #[serde(default)]
    pub keywords: Vec<String>,
    pub lookback_secs: u64,
    #[serde(default)]
    pub deep_research: bool,
    #[serde(default)]
    pub research_focus: String,
    #[serde(default)]
    pub destination_ids: Vec<DestinationId>,
    pub interval_secs: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub notify_when_empty: bool,
    #[serde(default)]
    pub schedule: ScheduleState,
}

impl ReportConfig {
    pub fn interval(&self) -> Duration {
        secs(self.interval_secs)
    }

    pub fn lookback(&self) -> Duration {
        secs(self.lookback_secs)
    }
}

/// Webhook flavour of a destination. Each kind owns its payload shape.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    /// WeCom (企业微信) group robot.
    #[serde(rename = "wecom", alias = "wechat")]
    WeCom,
    /// Kingsoft collaboration (金山协作) robot.
    #[serde(alias = "jinshan")]
    Kingsoft,
    Discord,
    Slack,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Destination {
    #[serde(default)]
    pub id: DestinationId,
    #[serde(default)]
    pub name: String,
    pub kind: PlatformKind,
    pub webhook: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/* ----------------------------
Report runs
---------------------------- */

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Pending,
    Delivered,
    Failed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub destination_id: DestinationId,
    pub outcome: DeliveryOutcome,
    #[serde(default)]
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Answered,
    Inconclusive,
}

/// Outcome of one deep-research sub-question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResearchNote {
    pub question: String,
    pub status: QuestionStatus,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub search_hits: usize,
}

/// One execution of a report config. Content and error are mutually exclusive and only
/// set by the terminal transitions; terminal runs are never reopened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportRun {
    pub id: RunId,
    pub config_id: ReportConfigId,
    status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    content: Option<String>,
    error: Option<String>,
    #[serde(default)]
    pub item_count: usize,
    #[serde(default)]
    pub research: Vec<ResearchNote>,
    #[serde(default)]
    pub deliveries: Vec<DeliveryRecord>,
}

impl ReportRun {
    pub fn new(id: RunId, config_id: ReportConfigId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            config_id,
            status: RunStatus::Pending,
            created_at: now,
            started_at: None,
            finished_at: None,
            content: None,
            error: None,
            item_count: 0,
            research: Vec::new(),
            deliveries: Vec::new(),
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), RunStateError> {
        if self.status != RunStatus::Pending {
            return Err(RunStateError::IllegalTransition {
                from: self.status.as_str(),
                to: RunStatus::Running.as_str(),
            });
        }
        self.status = RunStatus::Running;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn succeed(&mut self, content: String, now: DateTime<Utc>) -> Result<(), RunStateError> {
        if self.status != RunStatus::Running {
            return Err(RunStateError::IllegalTransition {
                from: self.status.as_str(),
                to: RunStatus::Succeeded.as_str(),
            });
        }
        if content.trim().is_empty() {
            return Err(RunStateError::EmptyContent);
        }
        self.status = RunStatus::Succeeded;
        self.content = Some(content);
        self.finished_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<(), RunStateError> {
        if self.status.is_terminal() {
            return Err(RunStateError::IllegalTransition {
                from: self.status.as_str(),
                to: RunStatus::Failed.as_str(),
            });
        }
        self.status = RunStatus::Failed;
        self.content = None;
        self.error = Some(error.into());
        self.finished_at = Some(now);
        Ok(())
    }

    /// Insert or replace the outcome for one destination.
    pub fn record_delivery(&mut self, record: DeliveryRecord) {
        match self
            .deliveries
            .iter_mut()
            .find(|d| d.destination_id == record.destination_id)
        {
            Some(existing) => *existing = record,
            None => self.deliveries.push(record),
        }
    }

    pub fn delivery_for(&self, destination_id: DestinationId) -> Option<&DeliveryOutcome> {
        self.deliveries
            .iter()
            .find(|d| d.destination_id == destination_id)
            .map(|d| &d.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap()
    }

    #[test]
    fn due_check_has_no_backfill() {
        let st = ScheduleState {
            phase: Phase::Idle,
            last_run_at: Some(t0()),
        };
        let interval = Duration::seconds(60);
        assert!(!st.is_due(interval, t0() + Duration::seconds(30)));
        assert!(st.is_due(interval, t0() + Duration::seconds(60)));
        // many missed intervals still read as a single "due"
        assert!(st.is_due(interval, t0() + Duration::hours(10)));
        assert!(ScheduleState::default().is_due(interval, t0()));
    }

    #[test]
    fn run_lifecycle_keeps_content_exclusive() {
        let mut run = ReportRun::new(1, 7, t0());
        assert_eq!(
            run.succeed("early".into(), t0()),
            Err(RunStateError::IllegalTransition {
                from: "pending",
                to: "succeeded"
            })
        );
        run.start(t0()).unwrap();
        assert_eq!(run.succeed("   ".into(), t0()), Err(RunStateError::EmptyContent));
        run.succeed("# Report".into(), t0()).unwrap();
        assert_eq!(run.status(), RunStatus::Succeeded);
        assert!(run.error().is_none());
        assert!(run.fail("late", t0()).is_err());
        assert!(run.start(t0()).is_err());
    }

    #[test]
    fn failed_run_has_no_content() {
        let mut run = ReportRun::new(2, 7, t0());
        run.start(t0()).unwrap();
        run.fail("synthesis failed", t0()).unwrap();
        assert_eq!(run.status(), RunStatus::Failed);
        assert!(run.content().is_none());
        assert_eq!(run.error(), Some("synthesis failed"));
    }

    #[test]
    fn delivery_records_are_replaced_in_place() {
        let mut run = ReportRun::new(3, 7, t0());
        run.record_delivery(DeliveryRecord {
            destination_id: 5,
            outcome: DeliveryOutcome::Pending,
            attempts: 0,
        });
        run.record_delivery(DeliveryRecord {
            destination_id: 5,
            outcome: DeliveryOutcome::Delivered,
            attempts: 1,
        });
        assert_eq!(run.deliveries.len(), 1);
        assert_eq!(run.delivery_for(5), Some(&DeliveryOutcome::Delivered));
    }

    #[test]
    fn platform_kind_accepts_legacy_names() {
        let k: PlatformKind = serde_json::from_str("\"wechat\"").unwrap();
        assert_eq!(k, PlatformKind::WeCom);
        let k: PlatformKind = serde_json::from_str("\"jinshan\"").unwrap();
        assert_eq!(k, PlatformKind::Kingsoft);
    }
}
