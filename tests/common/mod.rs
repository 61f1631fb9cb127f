// tests/common/mod.rs
//
// In-process fakes for every outbound collaborator, plus small builders.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Semaphore;

use source_digest::config::{CrawlSettings, DeliverySettings, ResearchSettings};
use source_digest::error::{DeliveryError, FetchError, LlmError, SearchError};
use source_digest::fetch::ContentFetcher;
use source_digest::llm::{LlmClient, RetryBudget};
use source_digest::model::{
    Destination, NewItem, PlatformKind, ReportConfig, ScheduleState, Source,
};
use source_digest::notify::webhook::{classify_status, WebhookAck, WebhookPoster};
use source_digest::search::{NoSearch, SearchHit, WebSearch};
use source_digest::store::{MemoryStore, Store};
use source_digest::{Clock, Pipeline, PipelineSettings};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap()
}

/* ---------- clock ---------- */

pub struct FixedClock(Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(at)))
    }
    pub fn advance(&self, secs: i64) {
        let mut g = self.0.lock().unwrap();
        *g += chrono::Duration::seconds(secs);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/* ---------- fetcher ---------- */

/// Serves fixed pages by URL; unknown URLs are 404. Optionally gated so a crawl
/// can be held "running" until the test releases it.
pub struct Pages {
    pages: Mutex<HashMap<String, String>>,
    gate: Option<Semaphore>,
    calls: Mutex<Vec<String>>,
}

impl Pages {
    pub fn new(pages: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self::build(pages, None))
    }

    pub fn gated(pages: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self::build(pages, Some(Semaphore::new(0))))
    }

    fn build(pages: &[(&str, &str)], gate: Option<Semaphore>) -> Self {
        Self {
            pages: Mutex::new(
                pages
                    .iter()
                    .map(|(u, b)| (u.to_string(), b.to_string()))
                    .collect(),
            ),
            gate,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn release(&self) {
        if let Some(g) = &self.gate {
            g.add_permits(1);
        }
    }

    pub fn set(&self, url: &str, body: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), body.to_string());
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == url).count()
    }
}

#[async_trait]
impl ContentFetcher for Pages {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        let _permit = match &self.gate {
            Some(g) => Some(g.acquire().await.unwrap()),
            None => None,
        };
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(FetchError::Status {
                status: 404,
                url: url.to_string(),
            })
    }
}

/* ---------- llm ---------- */

type Script = dyn Fn(&str, &str) -> Result<String, LlmError> + Send + Sync;

/// Answers through a closure over `(prompt, context)` and counts calls.
pub struct ScriptedLlm {
    script: Box<Script>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(
        f: impl Fn(&str, &str) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(f),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn fixed(text: &str) -> Arc<Self> {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(prompt, context)
    }
    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

/* ---------- search ---------- */

pub struct OneHitSearch;

#[async_trait]
impl WebSearch for OneHitSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        Ok(vec![SearchHit {
            title: format!("About {query}"),
            snippet: "context".into(),
            url: "https://web.test/a".into(),
            source: "web.test".into(),
            date: None,
        }])
    }
}

/* ---------- webhook ---------- */

/// Replies per endpoint with a fixed status (and body for 2xx); records every POST.
pub struct StatusWebhook {
    replies: HashMap<String, (u16, String)>,
    posts: Mutex<Vec<(String, serde_json::Value)>>,
}

impl StatusWebhook {
    pub fn new(replies: &[(&str, u16, &str)]) -> Arc<Self> {
        Arc::new(Self {
            replies: replies
                .iter()
                .map(|(e, s, b)| (e.to_string(), (*s, b.to_string())))
                .collect(),
            posts: Mutex::new(Vec::new()),
        })
    }

    pub fn posts_to(&self, endpoint: &str) -> usize {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == endpoint)
            .count()
    }

    pub fn total_posts(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn last_payload(&self, endpoint: &str) -> Option<serde_json::Value> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(e, _)| e == endpoint)
            .map(|(_, p)| p.clone())
    }
}

#[async_trait]
impl WebhookPoster for StatusWebhook {
    async fn post(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookAck, DeliveryError> {
        self.posts
            .lock()
            .unwrap()
            .push((endpoint.to_string(), payload.clone()));
        let (status, body) = self
            .replies
            .get(endpoint)
            .cloned()
            .unwrap_or((404, String::new()));
        match classify_status(status) {
            Some(err) => Err(err),
            None => Ok(WebhookAck { status, body }),
        }
    }
}

/* ---------- builders ---------- */

pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        crawl: CrawlSettings {
            enrich_details: false,
            ..Default::default()
        },
        research: ResearchSettings::default(),
        delivery: DeliverySettings {
            max_retries: 3,
            backoff_base_ms: 1,
            timeout_secs: 5,
        },
        llm_retry: RetryBudget {
            retries: 1,
            backoff: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        },
    }
}

pub struct Parts {
    pub store: Arc<MemoryStore>,
    pub fetcher: Arc<dyn ContentFetcher>,
    pub llm: Arc<dyn LlmClient>,
    pub search: Arc<dyn WebSearch>,
    pub webhook: Arc<dyn WebhookPoster>,
    pub clock: Arc<dyn Clock>,
    pub settings: PipelineSettings,
}

impl Parts {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            fetcher: Pages::new(&[]),
            llm: ScriptedLlm::fixed("- nothing notable"),
            search: Arc::new(NoSearch),
            webhook: StatusWebhook::new(&[]),
            clock: FixedClock::new(t0()),
            settings: fast_settings(),
        }
    }

    pub fn build(self) -> Arc<Pipeline> {
        Arc::new(Pipeline {
            store: self.store,
            fetcher: self.fetcher,
            llm: self.llm,
            search: self.search,
            webhook: self.webhook,
            clock: self.clock,
            settings: self.settings,
        })
    }
}

pub fn source(id: u64, url: &str, pattern: &str) -> Source {
    Source {
        id,
        name: format!("source {id}"),
        url: url.to_string(),
        pattern: Some(pattern.to_string()),
        interval_secs: 60,
        enabled: true,
        last_run_status: None,
        last_error: None,
        schedule: ScheduleState::default(),
    }
}

pub fn report(id: u64, source_ids: &[u64], destination_ids: &[u64]) -> ReportConfig {
    ReportConfig {
        id,
        name: format!("Report {id}"),
        purpose: "Track the news".into(),
        source_ids: source_ids.to_vec(),
        keywords: vec![],
        lookback_secs: 86_400,
        deep_research: false,
        research_focus: String::new(),
        destination_ids: destination_ids.to_vec(),
        interval_secs: 3_600,
        enabled: true,
        notify_when_empty: true,
        schedule: ScheduleState::default(),
    }
}

pub fn destination(id: u64, kind: PlatformKind, webhook: &str) -> Destination {
    Destination {
        id,
        name: format!("dest {id}"),
        kind,
        webhook: webhook.to_string(),
        enabled: true,
    }
}

pub async fn add_item(
    store: &MemoryStore,
    source_id: u64,
    slug: &str,
    title: &str,
    snippet: &str,
    at: DateTime<Utc>,
) {
    store
        .insert_item_if_new(NewItem {
            source_id,
            url: format!("https://site.test/{source_id}/{slug}"),
            dedup_key: format!("{source_id}-{slug}"),
            title: title.to_string(),
            snippet: snippet.to_string(),
            captured_at: at,
        })
        .await
        .unwrap();
}
