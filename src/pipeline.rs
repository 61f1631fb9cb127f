// src/pipeline.rs
//! Shared handles every executor runs against: the store, the outbound collaborators,
//! the clock and the tunables they need.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::{AppConfig, CrawlSettings, DeliverySettings, LlmSettings, ResearchSettings};
use crate::fetch::{ContentFetcher, HttpFetcher};
use crate::llm::{build_client_from_config, DynLlm, RetryBudget};
use crate::notify::webhook::{HttpWebhook, WebhookPoster};
use crate::search::{NoSearch, SerpApiSearch, WebSearch};
use crate::store::Store;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub crawl: CrawlSettings,
    pub research: ResearchSettings,
    pub delivery: DeliverySettings,
    pub llm_retry: RetryBudget,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            crawl: CrawlSettings::default(),
            research: ResearchSettings::default(),
            delivery: DeliverySettings::default(),
            llm_retry: RetryBudget::from_settings(&LlmSettings::default()),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            crawl: cfg.crawl.clone(),
            research: cfg.research.clone(),
            delivery: cfg.delivery.clone(),
            llm_retry: RetryBudget::from_settings(&cfg.llm),
        }
    }
}

pub struct Pipeline {
    pub store: Arc<dyn Store>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub llm: DynLlm,
    pub search: Arc<dyn WebSearch>,
    pub webhook: Arc<dyn WebhookPoster>,
    pub clock: Arc<dyn Clock>,
    pub settings: PipelineSettings,
}

impl Pipeline {
    /// Wire the production adapters described by `cfg` around `store`.
    pub fn from_config(cfg: &AppConfig, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        let search: Arc<dyn WebSearch> = if cfg.search.enabled {
            Arc::new(SerpApiSearch::from_settings(&cfg.search)?)
        } else {
            Arc::new(NoSearch)
        };
        let llm = build_client_from_config(&cfg.llm)?;
        tracing::info!(
            target: "pipeline",
            llm = llm.provider_name(),
            search = cfg.search.enabled,
            "pipeline collaborators ready"
        );
        Ok(Self {
            store,
            fetcher: Arc::new(HttpFetcher::new(&cfg.crawl)?),
            llm,
            search,
            webhook: Arc::new(HttpWebhook::new(&cfg.delivery)?),
            clock: Arc::new(SystemClock),
            settings: PipelineSettings::from_config(cfg),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
