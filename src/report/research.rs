// src/report/research.rs
//! Deep research: question generation, per-question investigation, synthesis.
//!
//! Stages 1 and 3 are barriers and fatal on failure. Stage 2 runs with bounded,
//! order-preserving concurrency; a failed question becomes an inconclusive note.

use futures::stream::{self, StreamExt};
use metrics::counter;
use std::fmt::Write as _;

use crate::config::ResearchSettings;
use crate::error::{LlmError, ReportError};
use crate::llm::{complete_with_retry, truncate_chars, LlmClient, RetryBudget};
use crate::model::{QuestionStatus, ReportConfig, ResearchNote};
use crate::search::{SearchHit, WebSearch};

pub const QUESTIONS_PROMPT: &str = "You plan research for a news analyst. From the report \
purpose, the research focus and the knowledge base, write the most useful follow-up \
questions about the concrete events in it. Answer with a JSON array of strings and nothing else.";

pub const ANSWER_PROMPT: &str = "You are a careful news analyst. Answer the question using \
the knowledge base and the web results provided. Be concrete, cite sources as [source](URL), \
and say plainly when the material does not answer the question.";

pub const SYNTHESIS_PROMPT: &str = "You are a professional news analyst. Write a detailed \
markdown report about the concrete events in the knowledge base, using the research findings. \
Structure: event overview, analysis, impact, outlook, recommendations. Cite sources as \
[source](URL). Do not write a generic industry overview.";

/// Everything stage 3 needs, plus the per-question record kept on the run.
#[derive(Debug, Clone)]
pub struct ResearchOutput {
    pub synthesis: String,
    pub notes: Vec<ResearchNote>,
}

/// Failures keep whatever notes were produced so the run can still show them.
#[derive(Debug, Clone)]
pub struct ResearchFailure {
    pub error: ReportError,
    pub notes: Vec<ResearchNote>,
}

impl From<ReportError> for ResearchFailure {
    fn from(error: ReportError) -> Self {
        Self {
            error,
            notes: Vec::new(),
        }
    }
}

pub struct Researcher<'a> {
    pub llm: &'a dyn LlmClient,
    pub search: &'a dyn WebSearch,
    pub settings: &'a ResearchSettings,
    pub budget: RetryBudget,
}

impl<'a> Researcher<'a> {
    pub async fn run(
        &self,
        config: &ReportConfig,
        knowledge_base: &str,
    ) -> Result<ResearchOutput, ResearchFailure> {
        let brief = brief(config);

        // 1) questions
        let context = format!("{brief}\n{knowledge_base}");
        let answer = complete_with_retry(self.llm, QUESTIONS_PROMPT, &context, self.budget)
            .await
            .map_err(ReportError::Questions)?;
        let questions = parse_questions(&answer, self.settings.max_questions).ok_or_else(|| {
            ReportError::Questions(LlmError::Malformed("no questions in answer".to_string()))
        })?;
        tracing::info!(target: "report", report_id = config.id, questions = questions.len(), "research questions ready");

        // 2) investigate, bounded and in order
        let notes: Vec<ResearchNote> = stream::iter(questions)
            .map(|q| self.investigate(q, &brief, knowledge_base))
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let answered = notes
            .iter()
            .filter(|n| n.status == QuestionStatus::Answered)
            .count();
        if answered == 0 {
            return Err(ResearchFailure {
                error: ReportError::AllQuestionsFailed(notes.len()),
                notes,
            });
        }

        // 3) synthesis
        let context = format!("{brief}\n{knowledge_base}\n\n{}", research_findings(&notes));

        match complete_with_retry(self.llm, SYNTHESIS_PROMPT, &context, self.budget).await {
            Ok(synthesis) => Ok(ResearchOutput { synthesis, notes }),
            Err(e) => Err(ResearchFailure {
                error: ReportError::Synthesis(e),
                notes,
            }),
        }
    }

    async fn investigate(&self, question: String, brief: &str, knowledge_base: &str) -> ResearchNote {
        let hits = if self.settings.search_per_question {
            match self.search.search(&question).await {
                Ok(hits) => hits,
                Err(e) => {
                    tracing::debug!(target: "report", %question, error = %e, "search unavailable; answering without web results");
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let context = format!(
            "Question: {question}\n\n{brief}\n{}\n{knowledge_base}",
            web_results(&hits)
        );
        let res = complete_with_retry(self.llm, ANSWER_PROMPT, &context, self.budget).await;

        let note = match res {
            Ok(answer) => ResearchNote {
                question,
                status: QuestionStatus::Answered,
                answer: Some(answer),
                error: None,
                search_hits: hits.len(),
            },
            Err(e) => {
                tracing::warn!(target: "report", %question, error = %e, "research question inconclusive");
                ResearchNote {
                    question,
                    status: QuestionStatus::Inconclusive,
                    answer: None,
                    error: Some(e.to_string()),
                    search_hits: hits.len(),
                }
            }
        };
        let label = match note.status {
            QuestionStatus::Answered => "answered",
            QuestionStatus::Inconclusive => "inconclusive",
        };
        counter!("research_questions_total", "status" => label).increment(1);
        note
    }
}

fn brief(config: &ReportConfig) -> String {
    format!(
        "<user_prompt>\n<report_purpose>{}</report_purpose>\n<research_focus>{}</research_focus>\n</user_prompt>",
        config.purpose.trim(),
        config.research_focus.trim()
    )
}

/// Answered notes only, escaped like the knowledge base.
fn research_findings(notes: &[ResearchNote]) -> String {
    let mut out = String::from("<research_findings>\n");
    for n in notes.iter().filter(|n| n.status == QuestionStatus::Answered) {
        let _ = writeln!(
            out,
            "<finding>\n<question>{}</question>\n<answer>{}</answer>\n</finding>",
            html_escape::encode_text(&n.question),
            html_escape::encode_text(n.answer.as_deref().unwrap_or_default())
        );
    }
    out.push_str("</research_findings>");
    out
}

fn web_results(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return String::new();
    }
    let mut out = String::from("<web_results>\n");
    for h in hits {
        let _ = writeln!(
            out,
            "<result>\n<title>{}</title>\n<url>{}</url>\n<snippet>{}</snippet>\n</result>",
            html_escape::encode_text(&h.title),
            html_escape::encode_text(&h.url),
            html_escape::encode_text(truncate_chars(&h.snippet, 500))
        );
    }
    out.push_str("</web_results>\n");
    out
}

/// Accept a JSON array of strings (optionally fenced) or a numbered/bulleted list.
/// `None` when nothing question-like is found.
pub fn parse_questions(answer: &str, max: usize) -> Option<Vec<String>> {
    let trimmed = answer.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let mut questions: Vec<String> = match serde_json::from_str::<Vec<String>>(unfenced) {
        Ok(list) => list,
        Err(_) => unfenced
            .lines()
            .map(strip_list_marker)
            .filter(|l| l.ends_with('?') || l.ends_with('？'))
            .map(str::to_string)
            .collect(),
    };
    questions.retain(|q| !q.trim().is_empty());
    for q in questions.iter_mut() {
        *q = q.trim().to_string();
    }
    questions.truncate(max);
    if questions.is_empty() {
        None
    } else {
        Some(questions)
    }
}

fn strip_list_marker(line: &str) -> &str {
    let l = line.trim();
    let l = l.trim_start_matches(['-', '*', '•']).trim_start();
    let digits = l.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &l[digits..];
        if let Some(r) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            return r.trim_start();
        }
    }
    l
}
