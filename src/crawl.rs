// src/crawl.rs
//! Crawl executor: one check of one source.
//!
//! fetch listing -> extract -> bounds check -> canonicalize/key -> dedup -> enrich -> record.
//! Errors are attached to the source and returned inside the outcome, never raised.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use std::time::Instant;
use url::Url;

use crate::config::CrawlSettings;
use crate::dedup::{canonicalize, dedup_key, DedupAdapter};
use crate::error::{CrawlError, FetchError};
use crate::extract::{
    compile_pattern, extract_candidates, normalize_text, summarize_detail, validate_match_count,
    TITLE_MAX_CHARS,
};
use crate::fetch::ContentFetcher;
use crate::metrics::ensure_metrics_described;
use crate::model::{LastRunStatus, NewItem, Source, SourceId};
use crate::store::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlOutcome {
    pub source_id: SourceId,
    pub candidates: usize,
    pub new_item_count: usize,
    pub error: Option<CrawlError>,
}

impl CrawlOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

pub async fn run_crawl(
    store: &dyn Store,
    fetcher: &dyn ContentFetcher,
    source: &Source,
    settings: &CrawlSettings,
    now: DateTime<Utc>,
) -> CrawlOutcome {
    ensure_metrics_described();
    let started = Instant::now();

    let mut outcome = CrawlOutcome {
        source_id: source.id,
        candidates: 0,
        new_item_count: 0,
        error: None,
    };
    if let Err(e) = crawl_inner(store, fetcher, source, settings, now, &mut outcome).await {
        outcome.error = Some(e);
    }

    let (status, detail) = match &outcome.error {
        None => (LastRunStatus::Ok, None),
        Some(e) => (LastRunStatus::Error, Some(e.to_string())),
    };
    if let Err(e) = store.record_crawl_outcome(source.id, status, detail).await {
        tracing::warn!(target: "crawl", source_id = source.id, error = %e, "could not record crawl outcome");
        outcome.error.get_or_insert(CrawlError::Store(e));
    }

    let label = if outcome.is_ok() { "ok" } else { "error" };
    counter!("crawl_runs_total", "status" => label).increment(1);
    counter!("crawl_new_items_total").increment(outcome.new_item_count as u64);
    histogram!("crawl_duration_ms").record(started.elapsed().as_millis() as f64);

    match &outcome.error {
        None => tracing::info!(
            target: "crawl",
            source_id = source.id,
            source = %source.name,
            candidates = outcome.candidates,
            new_items = outcome.new_item_count,
            "crawl finished"
        ),
        Some(e) => tracing::warn!(
            target: "crawl",
            source_id = source.id,
            source = %source.name,
            new_items = outcome.new_item_count,
            error = %e,
            "crawl failed"
        ),
    }
    outcome
}

async fn crawl_inner(
    store: &dyn Store,
    fetcher: &dyn ContentFetcher,
    source: &Source,
    settings: &CrawlSettings,
    now: DateTime<Utc>,
    outcome: &mut CrawlOutcome,
) -> Result<(), CrawlError> {
    let base = Url::parse(&source.url).map_err(|e| FetchError::Network {
        url: source.url.clone(),
        reason: format!("invalid url: {e}"),
    })?;
    let body = fetcher.fetch(&source.url).await?;

    let pattern = compile_pattern(source.pattern.as_deref())?;
    let candidates = extract_candidates(&body, &pattern);
    outcome.candidates = candidates.len();
    // a layout change shows up here as zero (or implausibly many) matches
    validate_match_count(candidates.len(), settings.bounds())?;

    let dedup = DedupAdapter::new(store);
    for candidate in candidates {
        if outcome.new_item_count >= settings.max_new_items_per_crawl {
            tracing::debug!(
                target: "crawl",
                source_id = source.id,
                cap = settings.max_new_items_per_crawl,
                "per-run item cap reached; remaining candidates wait for the next run"
            );
            break;
        }
        let Some(url) = canonicalize(&candidate, &base) else {
            tracing::debug!(target: "crawl", %candidate, "candidate is not an http(s) url");
            continue;
        };
        let key = dedup_key(&url);
        if !dedup.is_new(source.id, &key).await? {
            continue;
        }

        let (title, snippet) = if settings.enrich_details {
            enrich(fetcher, url.as_str()).await
        } else {
            (String::new(), String::new())
        };
        let title = if title.is_empty() {
            normalize_text(url.as_str(), TITLE_MAX_CHARS)
        } else {
            title
        };

        let admitted = dedup
            .record(NewItem {
                source_id: source.id,
                url: url.to_string(),
                dedup_key: key,
                title,
                snippet,
                captured_at: now,
            })
            .await?;
        if admitted.is_some() {
            outcome.new_item_count += 1;
        }
    }
    Ok(())
}

/// Best effort: a failed detail fetch leaves title/snippet empty.
async fn enrich(fetcher: &dyn ContentFetcher, url: &str) -> (String, String) {
    match fetcher.fetch(url).await {
        Ok(html) => {
            let d = summarize_detail(&html);
            (d.title, d.snippet)
        }
        Err(e) => {
            tracing::debug!(target: "crawl", %url, error = %e, "detail fetch failed");
            (String::new(), String::new())
        }
    }
}
