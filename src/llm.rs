//! Language-model capability: provider abstraction, daily call budget, retry helper.
//!
//! The pipeline only ever sees `LlmClient::complete(prompt, context)`. Which provider backs
//! it is decided once, from `[llm]` in the config.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmSettings;
use crate::error::LlmError;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send `prompt` (instructions) with `context` (material to work on); return the answer text.
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, LlmError>;
    /// Provider name for diagnostics/logs.
    fn provider_name(&self) -> &'static str;
}

/// Convenient alias used by callers.
pub type DynLlm = Arc<dyn LlmClient>;

/// Factory: build a client according to settings and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns a deterministic mock client.
/// * Else if `settings.enabled == false`, returns a disabled client.
/// * Else builds the OpenAI-compatible provider wrapped with the daily call budget.
pub fn build_client_from_config(settings: &LlmSettings) -> anyhow::Result<DynLlm> {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Ok(Arc::new(MockLlm::new("Neutral summary (mock)")));
    }

    if !settings.enabled {
        return Ok(Arc::new(DisabledClient));
    }

    let provider = OpenAiCompatProvider::from_settings(settings)?;
    Ok(Arc::new(BudgetedClient::new(
        provider,
        settings.state_dir.clone(),
        settings.daily_limit,
    )))
}

// ------------------------------------------------------------
// Concrete providers
// ------------------------------------------------------------

/// Chat-completions provider. OpenAI, DashScope (Qwen) and OpenRouter all speak this shape.
pub struct OpenAiCompatProvider {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout_secs: u64,
    name: &'static str,
}

impl OpenAiCompatProvider {
    pub fn from_settings(settings: &LlmSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("source-digest/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        let name = match settings.provider.as_str() {
            "openai" => "openai",
            "qwen" => "qwen",
            "openrouter" => "openrouter",
            _ => "custom",
        };
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", settings.endpoint_base()?),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            timeout_secs: settings.timeout_secs,
            name,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatProvider {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::Disabled);
        }

        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }

        let mut messages = vec![Msg {
            role: "system",
            content: prompt,
        }];
        if !context.is_empty() {
            messages.push(Msg {
                role: "user",
                content: context,
            });
        }
        let req = Req {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout_secs)
                } else {
                    LlmError::Request(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LlmError::Status(status.as_u16()));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::Malformed("empty completion".into()));
        }
        Ok(content)
    }

    fn provider_name(&self) -> &'static str {
        self.name
    }
}

/// Always fails with `LlmError::Disabled`; used when the LLM is switched off.
pub struct DisabledClient;

#[async_trait]
impl LlmClient for DisabledClient {
    async fn complete(&self, _prompt: &str, _context: &str) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Simple mock provider for local runs: answers every call with the same text.
#[derive(Clone)]
pub struct MockLlm {
    pub fixed: String,
}

impl MockLlm {
    pub fn new(fixed: impl Into<String>) -> Self {
        Self {
            fixed: fixed.into(),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, _prompt: &str, _context: &str) -> Result<String, LlmError> {
        Ok(self.fixed.clone())
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Daily budget wrapper
// ------------------------------------------------------------

/// Counts successful provider calls per UTC day and refuses calls past the limit.
/// The counter is persisted so restarts do not reset the budget.
pub struct BudgetedClient<P: LlmClient> {
    inner: P,
    state_dir: PathBuf,
    daily_limit_max: u32,
    counter: Mutex<DailyCounter>,
}

impl<P: LlmClient> BudgetedClient<P> {
    pub fn new(inner: P, state_dir: PathBuf, daily_limit_max: u32) -> Self {
        let _ = fs::create_dir_all(&state_dir); // best-effort
        let counter = Mutex::new(load_daily_counter(&state_dir).unwrap_or_default());
        Self {
            inner,
            state_dir,
            daily_limit_max,
            counter,
        }
    }

    /// Take a slot under the lock so parallel callers cannot overshoot the limit.
    /// Returns the day the slot was taken on, for `refund`.
    fn reserve(&self) -> Result<String, LlmError> {
        let mut g = self
            .counter
            .lock()
            .map_err(|_| LlmError::Request("budget counter poisoned".into()))?;
        if g.is_expired() {
            g.reset_to_today();
        }
        if g.count >= self.daily_limit_max {
            return Err(LlmError::DailyLimit(self.daily_limit_max));
        }
        g.count += 1;
        let _ = save_daily_counter(&self.state_dir, &g);
        Ok(g.date.clone())
    }

    /// Give back a slot whose call failed, unless the day has rolled over since.
    fn refund(&self, day: &str) {
        if let Ok(mut g) = self.counter.lock() {
            if g.date == day {
                g.count = g.count.saturating_sub(1);
                let _ = save_daily_counter(&self.state_dir, &g);
            }
        }
    }

    pub fn used_today(&self) -> u32 {
        self.counter.lock().map(|g| g.count).unwrap_or(0)
    }
}

#[async_trait]
impl<P: LlmClient> LlmClient for BudgetedClient<P> {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String, LlmError> {
        let day = self.reserve()?;
        let out = self.inner.complete(prompt, context).await;
        // only successful calls count against the budget
        if out.is_err() {
            self.refund(&day);
        }
        out
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}

impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != today()
    }
    fn reset_to_today(&mut self) {
        self.date = today();
        self.count = 0;
    }
}

fn today() -> String {
    chrono::Utc::now().date_naive().to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let p = counter_path(dir);
    let tmp = p.with_extension("json.tmp");
    let s = serde_json::to_string(dc).unwrap_or_else(|_| "{}".to_string());
    let mut f = fs::File::create(&tmp)?;
    f.write_all(s.as_bytes())?;
    fs::rename(tmp, p)?;
    Ok(())
}

// ------------------------------------------------------------
// Retry within a stage's budget
// ------------------------------------------------------------

/// Per-call timeout and retry policy applied by the calling stage.
#[derive(Debug, Clone, Copy)]
pub struct RetryBudget {
    pub retries: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl RetryBudget {
    pub fn from_settings(s: &LlmSettings) -> Self {
        Self {
            retries: s.retry_budget,
            backoff: Duration::from_millis(s.retry_backoff_ms),
            timeout: Duration::from_secs(s.timeout_secs),
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.min(10))
    }
}

/// Call the model, retrying transient failures (including timeouts) up to `budget.retries` times.
pub async fn complete_with_retry(
    llm: &dyn LlmClient,
    prompt: &str,
    context: &str,
    budget: RetryBudget,
) -> Result<String, LlmError> {
    let mut attempt: u32 = 0;
    loop {
        let res = match tokio::time::timeout(budget.timeout, llm.complete(prompt, context)).await {
            Ok(r) => r,
            Err(_) => Err(LlmError::Timeout(budget.timeout.as_secs())),
        };
        match res {
            Ok(text) => return Ok(text),
            Err(e) if e.is_transient() && attempt < budget.retries => {
                tracing::debug!(
                    target: "llm",
                    provider = llm.provider_name(),
                    attempt,
                    error = %e,
                    "transient llm failure, retrying"
                );
                tokio::time::sleep(budget.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Truncate to at most `max` chars on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
