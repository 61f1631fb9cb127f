// src/error.rs
//! Error taxonomy for the monitor-to-report pipeline.
//!
//! Every failure is contained to the run that produced it: crawl errors land on the
//! `Source`, report errors on the `ReportRun`, delivery errors on the per-destination
//! outcome. Nothing here is meant to bubble up into the scheduler loop.

use thiserror::Error;

/// Listing/detail page could not be fetched. Transient; retried on the next tick only.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },
    #[error("request to {url} timed out after {secs}s")]
    Timeout { url: String, secs: u64 },
    #[error("http status {status} for {url}")]
    Status { status: u16, url: String },
}

/// Extraction pattern missing, unparseable, or producing an implausible match count.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PatternInvalid {
    #[error("no extraction pattern configured")]
    Missing,
    #[error("pattern does not compile: {0}")]
    Syntax(String),
    #[error("pattern matched nothing")]
    NoMatches,
    #[error("pattern matched {count} candidates (limit {max})")]
    TooManyMatches { count: usize, max: usize },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("language model disabled")]
    Disabled,
    #[error("daily call limit of {0} reached")]
    DailyLimit(u32),
    #[error("language model request failed: {0}")]
    Request(String),
    #[error("language model timed out after {0}s")]
    Timeout(u64),
    #[error("language model returned http {0}")]
    Status(u16),
    #[error("unusable language model answer: {0}")]
    Malformed(String),
}

impl LlmError {
    /// Whether another attempt inside the stage's retry budget makes sense.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Request(_) | LlmError::Timeout(_) => true,
            LlmError::Status(code) => *code == 429 || *code >= 500,
            LlmError::Disabled | LlmError::DailyLimit(_) | LlmError::Malformed(_) => false,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("web search not configured")]
    NotConfigured,
    #[error("web search request failed: {0}")]
    Request(String),
    #[error("web search returned http {0}")]
    Status(u16),
    #[error("web search response unreadable: {0}")]
    Decode(String),
}

/// Webhook delivery failure, split by whether a retry can help.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),
    #[error("delivery rejected: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            DeliveryError::Transient(r) | DeliveryError::Permanent(r) => r,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },
    #[error("source {0} is referenced by a report config; disable it instead")]
    Referenced(u64),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("snapshot io: {0}")]
    Snapshot(String),
}

/// Illegal `ReportRun` state transition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunStateError {
    #[error("cannot move run from {from} to {to}")]
    IllegalTransition { from: &'static str, to: &'static str },
    #[error("a succeeded run needs non-empty content")]
    EmptyContent,
}

/// Pattern inference failed either at the model or at validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InferError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Pattern(#[from] PatternInvalid),
}

/// Everything that can end a single crawl early.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CrawlError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Pattern(#[from] PatternInvalid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fatal report-generation failures (recorded on the run, never thrown further).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("synthesis failed: {0}")]
    Synthesis(LlmError),
    #[error("question generation failed: {0}")]
    Questions(LlmError),
    #[error("all {0} research questions were inconclusive")]
    AllQuestionsFailed(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
}
