// src/extract.rs
//! Extraction rules: turn a listing page into candidate item URLs, infer a pattern with
//! the language model, and pull a title/snippet out of a detail page.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::error::{InferError, PatternInvalid};
use crate::llm::{complete_with_retry, truncate_chars, LlmClient, RetryBudget};

pub const DEFAULT_MAX_MATCHES: usize = 500;

/// Plausible match-count window for a listing-page pattern. The lower bound is always 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternBounds {
    pub max_matches: usize,
}

impl Default for PatternBounds {
    fn default() -> Self {
        Self {
            max_matches: DEFAULT_MAX_MATCHES,
        }
    }
}

pub fn compile_pattern(pattern: Option<&str>) -> Result<Regex, PatternInvalid> {
    let text = pattern
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or(PatternInvalid::Missing)?;
    Regex::new(text).map_err(|e| PatternInvalid::Syntax(e.to_string()))
}

/// Apply `pattern` to `body` and return the candidates in order of appearance.
/// Group 1 is the candidate when the pattern has a capture group, otherwise the whole match.
/// Duplicates are kept; admission is the dedup adapter's job.
pub fn extract_candidates(body: &str, pattern: &Regex) -> Vec<String> {
    let has_group = pattern.captures_len() > 1;
    pattern
        .captures_iter(body)
        .filter_map(|caps| {
            let m = if has_group { caps.get(1) } else { caps.get(0) };
            m.map(|m| m.as_str().trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn validate_match_count(count: usize, bounds: PatternBounds) -> Result<(), PatternInvalid> {
    if count == 0 {
        return Err(PatternInvalid::NoMatches);
    }
    if count > bounds.max_matches {
        return Err(PatternInvalid::TooManyMatches {
            count,
            max: bounds.max_matches,
        });
    }
    Ok(())
}

/// Compile, extract and bounds-check in one go (used by previews and inference).
pub fn extract_validated(
    body: &str,
    pattern: &str,
    bounds: PatternBounds,
) -> Result<Vec<String>, PatternInvalid> {
    let re = compile_pattern(Some(pattern))?;
    let found = extract_candidates(body, &re);
    validate_match_count(found.len(), bounds)?;
    Ok(found)
}

/// A model-suggested pattern that survived validation against its sample.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InferredPattern {
    pub pattern: String,
    pub match_count: usize,
    pub preview: Vec<String>,
}

const INFER_PROMPT: &str = "You write regular expressions for link extraction. \
Given a listing page and a description of the wanted links, answer with ONE regular \
expression on a single line and nothing else. Put the URL in capture group 1, e.g. \
href=\"(https://example\\.com/news/\\d{8}/[a-f0-9]+\\.html)\". Escape dots, close every \
character class, and do not use look-around.";

/// Ask the model for a pattern and accept it only if it extracts a plausible number of
/// candidates from the same sample. The model's answer is untrusted input.
pub async fn infer_pattern(
    llm: &dyn LlmClient,
    sample_body: &str,
    hints: &[String],
    bounds: PatternBounds,
    budget: RetryBudget,
) -> Result<InferredPattern, InferError> {
    let mut context = String::new();
    if !hints.is_empty() {
        context.push_str("Wanted links look like:\n");
        for h in hints {
            context.push_str("- ");
            context.push_str(h.trim());
            context.push('\n');
        }
        context.push('\n');
    }
    context.push_str("Page content (truncated):\n");
    context.push_str(truncate_chars(sample_body, 3000));

    let answer = complete_with_retry(llm, INFER_PROMPT, &context, budget).await?;
    let pattern = clean_pattern_answer(&answer).ok_or(PatternInvalid::Missing)?;

    let found = extract_validated(sample_body, &pattern, bounds)?;
    tracing::info!(
        target: "extract",
        %pattern,
        matches = found.len(),
        "inferred pattern accepted"
    );
    Ok(InferredPattern {
        pattern,
        match_count: found.len(),
        preview: found.into_iter().take(10).collect(),
    })
}

/// Strip code fences, surrounding backticks and `r"..."` wrappers; keep the first real line.
pub fn clean_pattern_answer(answer: &str) -> Option<String> {
    let line = answer
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("```"))?;
    let mut p = line.trim_matches('`').trim();
    if let Some(inner) = p.strip_prefix("r\"").and_then(|s| s.strip_suffix('"')) {
        p = inner;
    } else if let Some(inner) = p.strip_prefix("r'").and_then(|s| s.strip_suffix('\'')) {
        p = inner;
    }
    if p.is_empty() {
        None
    } else {
        Some(p.to_string())
    }
}

/* ----------------------------
Text normalization
---------------------------- */

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Normalize text: decode entities, strip tags, collapse whitespace, cap length.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    out = RE_TAGS.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    out = RE_WS.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }
    out
}

/* ----------------------------
Detail pages
---------------------------- */

pub const TITLE_MAX_CHARS: usize = 200;
pub const SNIPPET_MAX_CHARS: usize = 400;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailSummary {
    pub title: String,
    pub snippet: String,
}

static SEL_H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").unwrap());
static SEL_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static SEL_PARA: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("article p, .article p, .content p, main p, p").unwrap()
});
static SEL_META_DESC: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[name="description"], meta[property="og:description"]"#).unwrap()
});

/// Title from the first `<h1>` (falling back to `<title>`), snippet from the leading
/// paragraphs (falling back to the meta description).
pub fn summarize_detail(html: &str) -> DetailSummary {
    let doc = Html::parse_document(html);

    let text_of = |sel: &Selector| {
        doc.select(sel)
            .map(|el| normalize_text(&el.text().collect::<String>(), TITLE_MAX_CHARS))
            .find(|t| !t.is_empty())
    };
    let title = text_of(&*SEL_H1).or_else(|| text_of(&*SEL_TITLE)).unwrap_or_default();

    let mut snippet = String::new();
    for el in doc.select(&SEL_PARA) {
        let t = normalize_text(&el.text().collect::<String>(), SNIPPET_MAX_CHARS);
        // skip nav crumbs and bylines
        if t.chars().count() < 20 {
            continue;
        }
        if !snippet.is_empty() {
            snippet.push(' ');
        }
        snippet.push_str(&t);
        if snippet.chars().count() >= SNIPPET_MAX_CHARS / 2 {
            break;
        }
    }
    if snippet.is_empty() {
        snippet = doc
            .select(&SEL_META_DESC)
            .filter_map(|el| el.value().attr("content"))
            .map(|c| normalize_text(c, SNIPPET_MAX_CHARS))
            .find(|t| !t.is_empty())
            .unwrap_or_default();
    }

    DetailSummary {
        title,
        snippet: normalize_text(&snippet, SNIPPET_MAX_CHARS),
    }
}
