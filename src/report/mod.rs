// src/report/mod.rs
//! Report generator: select captured items for a config, summarize them (simple mode)
//! or research them (deep mode), record the run, then hand it to the dispatcher.

pub mod render;
pub mod research;

use metrics::{counter, histogram};
use std::time::Instant;

use crate::error::{ReportError, StoreError};
use crate::llm::complete_with_retry;
use crate::metrics::ensure_metrics_described;
use crate::model::{CapturedItem, ReportConfig, ReportRun, RunStatus};
use crate::notify::{Dispatcher, Outgoing};
use crate::pipeline::Pipeline;
use research::Researcher;

pub const SUMMARY_PROMPT: &str = "You are a news editor. Summarize the knowledge base for \
the stated purpose as a short markdown list of highlights. Keep each highlight to one or two \
sentences, mention concrete facts, and cite sources as [source](URL).";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Empty,
    Simple,
    Deep,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Mode::Empty => "empty",
            Mode::Simple => "simple",
            Mode::Deep => "deep",
        }
    }
}

/// Case-insensitive OR match on title + snippet. No keywords matches everything.
pub fn matches_keywords(item: &CapturedItem, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let haystack = format!("{} {}", item.title, item.snippet).to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .any(|k| haystack.contains(&k))
}

/// Keyword filter over an already window- and source-restricted item list; order is kept.
pub fn select_items(items: Vec<CapturedItem>, keywords: &[String]) -> Vec<CapturedItem> {
    items
        .into_iter()
        .filter(|i| matches_keywords(i, keywords))
        .collect()
}

/// Execute one run of `config` end to end. Only store failures surface as `Err`;
/// generation failures end up on the returned run.
pub async fn run_report(p: &Pipeline, config: &ReportConfig) -> Result<ReportRun, StoreError> {
    ensure_metrics_described();
    let started = Instant::now();
    let store = p.store.as_ref();

    let now = p.now();
    let mut run = store.create_run(config.id, now).await?;
    if let Err(e) = run.start(now) {
        tracing::error!(target: "report", run_id = run.id, error = %e, "fresh run refused to start");
    }
    store.save_run(&run).await?;

    let window_start = now - config.lookback();
    let items = match store
        .items_for_sources(&config.source_ids, window_start, now)
        .await
    {
        Ok(items) => items,
        Err(e) => {
            // close the run before surfacing the error so it never stays running
            let reason = ReportError::Store(e.clone()).to_string();
            let _ = run.fail(reason, p.now());
            if let Err(save) = store.save_run(&run).await {
                tracing::error!(target: "report", run_id = run.id, error = %save, "could not record failed run");
            }
            counter!("report_runs_total", "mode" => "none", "status" => RunStatus::Failed.as_str()).increment(1);
            return Err(e);
        }
    };
    let selected = select_items(items, &config.keywords);
    run.item_count = selected.len();
    let context_items = &selected[..selected.len().min(p.settings.research.max_context_items)];

    let mode = if selected.is_empty() {
        Mode::Empty
    } else if config.deep_research {
        Mode::Deep
    } else {
        Mode::Simple
    };

    let generated: Result<String, ReportError> = match mode {
        Mode::Empty => Ok(render::render_empty(config, now)),
        Mode::Deep => {
            let kb = render::knowledge_base(context_items);
            let researcher = Researcher {
                llm: p.llm.as_ref(),
                search: p.search.as_ref(),
                settings: &p.settings.research,
                budget: p.settings.llm_retry,
            };
            match researcher.run(config, &kb).await {
                Ok(out) => {
                    let body = render::render_deep(
                        config,
                        now,
                        &out.synthesis,
                        &out.notes,
                        context_items,
                        selected.len(),
                    );
                    run.research = out.notes;
                    Ok(body)
                }
                Err(fail) => {
                    run.research = fail.notes;
                    Err(fail.error)
                }
            }
        }
        Mode::Simple => {
            let kb = render::knowledge_base(context_items);
            let context = format!(
                "<report_purpose>{}</report_purpose>\n{kb}",
                config.purpose.trim()
            );
            complete_with_retry(p.llm.as_ref(), SUMMARY_PROMPT, &context, p.settings.llm_retry)
                .await
                .map(|highlights| {
                    render::render_simple(config, now, &highlights, context_items, selected.len())
                })
                .map_err(ReportError::Synthesis)
        }
    };

    let finished = p.now();
    match generated {
        Ok(content) => {
            if let Err(e) = run.succeed(content, finished) {
                let _ = run.fail(e.to_string(), finished);
            }
        }
        Err(e) => {
            let _ = run.fail(e.to_string(), finished);
        }
    }
    store.save_run(&run).await?;

    let status = run.status();
    counter!("report_runs_total", "mode" => mode.as_str(), "status" => status.as_str()).increment(1);
    histogram!("report_duration_ms").record(started.elapsed().as_millis() as f64);
    match run.error() {
        None => tracing::info!(
            target: "report",
            report_id = config.id,
            run_id = run.id,
            mode = mode.as_str(),
            items = run.item_count,
            "report generated"
        ),
        Some(err) => tracing::warn!(
            target: "report",
            report_id = config.id,
            run_id = run.id,
            mode = mode.as_str(),
            error = %err,
            "report failed"
        ),
    }

    if status == RunStatus::Succeeded && (run.item_count > 0 || config.notify_when_empty) {
        let content = run.content().unwrap_or_default().to_string();
        let msg = Outgoing {
            title: &config.name,
            content: &content,
            deep: mode == Mode::Deep,
        };
        let dispatcher = Dispatcher::new(store, p.webhook.as_ref(), &p.settings.delivery);
        for record in dispatcher.deliver(&msg, &config.destination_ids).await {
            run.record_delivery(record);
        }
        store.save_run(&run).await?;
    }

    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(title: &str, snippet: &str) -> CapturedItem {
        CapturedItem {
            id: 1,
            source_id: 1,
            url: "https://x.test/a".into(),
            dedup_key: "k".into(),
            title: title.into(),
            snippet: snippet.into(),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn keywords_are_or_matched_case_insensitively() {
        let kws = vec!["OpenAI".to_string(), "芯片".to_string()];
        assert!(matches_keywords(&item("openai ships a model", ""), &kws));
        assert!(matches_keywords(&item("Markets", "国产芯片出货"), &kws));
        assert!(!matches_keywords(&item("Weather", "sunny"), &kws));
        assert!(matches_keywords(&item("Weather", "sunny"), &[]));
    }
}
