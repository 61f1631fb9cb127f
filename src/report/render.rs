// src/report/render.rs
use chrono::{DateTime, Utc};
use std::fmt::Write as _;

use crate::model::{CapturedItem, QuestionStatus, ReportConfig, ResearchNote};

/// Items listed under "Sources" before the rest is summarized as a count.
const MAX_LISTED: usize = 20;

fn header(config: &ReportConfig, now: DateTime<Utc>, item_count: usize, mode: &str) -> String {
    let mut out = format!("# {}\n\n", config.name);
    let _ = writeln!(
        out,
        "_Generated {} UTC · {} item(s) · {}_",
        now.format("%Y-%m-%d %H:%M"),
        item_count,
        mode
    );
    if !config.purpose.trim().is_empty() {
        let _ = writeln!(out, "\n> **Purpose:** {}", config.purpose.trim());
    }
    out.push('\n');
    out
}

fn sources_section(items: &[CapturedItem], total: usize) -> String {
    let mut out = String::from("## Sources\n\n");
    for (i, item) in items.iter().take(MAX_LISTED).enumerate() {
        let _ = writeln!(out, "{}. [{}]({})", i + 1, item.title, item.url);
    }
    let listed = items.len().min(MAX_LISTED);
    if total > listed {
        let _ = writeln!(out, "\n*{} more item(s) not listed*", total - listed);
    }
    out
}

/// Body for a run whose selection came back empty.
pub fn render_empty(config: &ReportConfig, now: DateTime<Utc>) -> String {
    let mut out = header(config, now, 0, "no matching items");
    let hours = config.lookback_secs / 3600;
    let _ = writeln!(
        out,
        "No matching items were captured in the last {}.",
        if hours >= 1 {
            format!("{hours}h")
        } else {
            format!("{}s", config.lookback_secs)
        }
    );
    out
}

pub fn render_simple(
    config: &ReportConfig,
    now: DateTime<Utc>,
    highlights: &str,
    items: &[CapturedItem],
    total: usize,
) -> String {
    let mut out = header(config, now, total, "summary");
    out.push_str("## Highlights\n\n");
    out.push_str(highlights.trim());
    out.push_str("\n\n");
    out.push_str(&sources_section(items, total));
    out
}

pub fn render_deep(
    config: &ReportConfig,
    now: DateTime<Utc>,
    synthesis: &str,
    notes: &[ResearchNote],
    items: &[CapturedItem],
    total: usize,
) -> String {
    let mut out = header(config, now, total, "deep research");
    if !config.research_focus.trim().is_empty() {
        let _ = writeln!(out, "> **Focus:** {}\n", config.research_focus.trim());
    }
    out.push_str(synthesis.trim());
    out.push_str("\n\n");
    out.push_str(&research_notes_section(notes));
    out.push('\n');
    out.push_str(&sources_section(items, total));
    out
}

pub fn research_notes_section(notes: &[ResearchNote]) -> String {
    let mut out = String::from("## Research notes\n\n");
    for (i, note) in notes.iter().enumerate() {
        match note.status {
            QuestionStatus::Answered => {
                let _ = writeln!(
                    out,
                    "{}. {} (answered, {} web result(s))",
                    i + 1,
                    note.question,
                    note.search_hits
                );
            }
            QuestionStatus::Inconclusive => {
                let _ = writeln!(
                    out,
                    "{}. {} (**inconclusive**: {})",
                    i + 1,
                    note.question,
                    note.error.as_deref().unwrap_or("no answer")
                );
            }
        }
    }
    out
}

/// Items as an XML knowledge base for the model, newest first, content capped.
pub fn knowledge_base(items: &[CapturedItem]) -> String {
    let mut out = String::from("<knowledge_base>\n");
    for (i, item) in items.iter().enumerate() {
        let _ = writeln!(out, "<article id='{}'>", i + 1);
        let _ = writeln!(out, "<title>{}</title>", html_escape::encode_text(&item.title));
        let _ = writeln!(out, "<url>{}</url>", html_escape::encode_text(&item.url));
        let _ = writeln!(out, "<date>{}</date>", item.captured_at.format("%Y-%m-%d %H:%M"));
        let _ = writeln!(out, "<content>{}</content>", html_escape::encode_text(&item.snippet));
        out.push_str("</article>\n");
    }
    out.push_str("</knowledge_base>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScheduleState;
    use chrono::TimeZone;

    fn config() -> ReportConfig {
        ReportConfig {
            id: 1,
            name: "Morning brief".into(),
            purpose: "Track AI policy".into(),
            source_ids: vec![1],
            keywords: vec![],
            lookback_secs: 86400,
            deep_research: false,
            research_focus: String::new(),
            destination_ids: vec![],
            interval_secs: 3600,
            enabled: true,
            notify_when_empty: true,
            schedule: ScheduleState::default(),
        }
    }

    #[test]
    fn empty_report_says_so() {
        let now = Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap();
        let body = render_empty(&config(), now);
        assert!(body.starts_with("# Morning brief"));
        assert!(body.contains("No matching items were captured in the last 24h."));
    }

    #[test]
    fn inconclusive_questions_are_marked() {
        let notes = vec![
            ResearchNote {
                question: "Who?".into(),
                status: QuestionStatus::Answered,
                answer: Some("them".into()),
                error: None,
                search_hits: 2,
            },
            ResearchNote {
                question: "Why?".into(),
                status: QuestionStatus::Inconclusive,
                answer: None,
                error: Some("language model returned http 500".into()),
                search_hits: 0,
            },
        ];
        let s = research_notes_section(&notes);
        assert!(s.contains("1. Who? (answered, 2 web result(s))"));
        assert!(s.contains("2. Why? (**inconclusive**: language model returned http 500)"));
    }

    #[test]
    fn knowledge_base_escapes_markup() {
        let item = CapturedItem {
            id: 1,
            source_id: 1,
            url: "https://x.test/a?b=1&c=2".into(),
            dedup_key: "k".into(),
            title: "<AT&T>".into(),
            snippet: String::new(),
            captured_at: Utc::now(),
        };
        let kb = knowledge_base(&[item]);
        assert!(kb.contains("<title>&lt;AT&amp;T&gt;</title>"));
        assert!(kb.contains("b=1&amp;c=2"));
    }
}
