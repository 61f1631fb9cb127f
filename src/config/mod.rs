// src/config/mod.rs
//! Application configuration: one TOML file with tunables plus the seeded
//! sources, report configs and destinations.

pub mod ai;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::extract::PatternBounds;
use crate::model::{Destination, ReportConfig, Source};

pub use ai::{LlmSettings, SearchSettings};

// --- env defaults & names ---
pub const DEFAULT_CONFIG_PATH: &str = "config/digest.toml";
pub const ENV_CONFIG_PATH: &str = "DIGEST_CONFIG_PATH";
pub const ENV_TICK_SECS: &str = "DIGEST_TICK_SECS";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tick_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { tick_secs: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlSettings {
    pub fetch_timeout_secs: u64,
    pub max_new_items_per_crawl: usize,
    /// Fetch each new item's detail page for title/snippet.
    pub enrich_details: bool,
    pub user_agent: String,
    pub max_matches: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 15,
            max_new_items_per_crawl: 20,
            enrich_details: true,
            user_agent: "source-digest/0.1 (+https://github.com/lumlich/source-digest)".to_string(),
            max_matches: crate::extract::DEFAULT_MAX_MATCHES,
        }
    }
}

impl CrawlSettings {
    pub fn bounds(&self) -> PatternBounds {
        PatternBounds {
            max_matches: self.max_matches,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchSettings {
    pub max_questions: usize,
    /// Parallel per-question investigations.
    pub concurrency: usize,
    pub max_context_items: usize,
    pub search_per_question: bool,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            max_questions: 8,
            concurrency: 3,
            max_context_items: 20,
            search_per_question: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub timeout_secs: u64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// JSON snapshot of the in-memory store; `None` keeps everything in memory.
    pub snapshot_path: Option<PathBuf>,
    pub flush_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            snapshot_path: Some(PathBuf::from("state/digest.json")),
            flush_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerSettings,
    pub crawl: CrawlSettings,
    pub llm: LlmSettings,
    pub search: SearchSettings,
    pub research: ResearchSettings,
    pub delivery: DeliverySettings,
    pub store: StoreSettings,
    pub sources: Vec<Source>,
    pub reports: Vec<ReportConfig>,
    pub destinations: Vec<Destination>,
}

impl AppConfig {
    /// Load using `DIGEST_CONFIG_PATH`, falling back to `config/digest.toml`.
    /// A missing default file yields the built-in defaults; a missing explicit path is an error.
    pub fn load_default() -> Result<Self> {
        let mut cfg = match std::env::var(ENV_CONFIG_PATH) {
            Ok(p) => Self::load_from_file(Path::new(&p))?,
            Err(_) => {
                let p = PathBuf::from(DEFAULT_CONFIG_PATH);
                if p.exists() {
                    Self::load_from_file(&p)?
                } else {
                    let mut cfg = Self::default();
                    cfg.normalize()?;
                    cfg
                }
            }
        };

        if let Some(secs) = std::env::var(ENV_TICK_SECS)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            cfg.scheduler.tick_secs = secs.max(1);
        }
        Ok(cfg)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: AppConfig = toml::from_str(s)?;
        cfg.normalize()?;
        Ok(cfg)
    }

    fn normalize(&mut self) -> Result<()> {
        self.llm.normalize()?;
        self.search.normalize()?;

        self.scheduler.tick_secs = self.scheduler.tick_secs.max(1);
        self.crawl.fetch_timeout_secs = self.crawl.fetch_timeout_secs.max(1);
        self.crawl.max_matches = self.crawl.max_matches.max(1);
        self.research.max_questions = self.research.max_questions.clamp(1, 20);
        self.research.concurrency = self.research.concurrency.max(1);
        self.research.max_context_items = self.research.max_context_items.max(1);
        self.delivery.timeout_secs = self.delivery.timeout_secs.max(1);
        self.store.flush_secs = self.store.flush_secs.max(1);

        for kw in self.reports.iter_mut().flat_map(|r| r.keywords.iter_mut()) {
            *kw = kw.trim().to_string();
        }
        for r in &mut self.reports {
            r.keywords.retain(|k| !k.is_empty());
        }

        self.validate_references()
    }

    /// Seeded entities need explicit, unique ids so reseeding an existing snapshot
    /// overwrites instead of duplicating. Report configs may only point at seeded
    /// sources/destinations.
    fn validate_references(&self) -> Result<()> {
        let source_ids = unique_ids("source", self.sources.iter().map(|s| s.id))?;
        let dest_ids = unique_ids("destination", self.destinations.iter().map(|d| d.id))?;
        unique_ids("report", self.reports.iter().map(|r| r.id))?;
        for r in &self.reports {
            if let Some(missing) = r.source_ids.iter().find(|id| !source_ids.contains(id)) {
                anyhow::bail!("report `{}` references unknown source {missing}", r.name);
            }
            if let Some(missing) = r.destination_ids.iter().find(|id| !dest_ids.contains(id)) {
                anyhow::bail!("report `{}` references unknown destination {missing}", r.name);
            }
        }
        Ok(())
    }
}

fn unique_ids(kind: &str, ids: impl Iterator<Item = u64>) -> Result<HashSet<u64>> {
    let mut seen = HashSet::new();
    for id in ids {
        if id == 0 {
            anyhow::bail!("every configured {kind} needs an explicit non-zero id");
        }
        if !seen.insert(id) {
            anyhow::bail!("duplicate {kind} id {id} in config");
        }
    }
    Ok(seen)
}
