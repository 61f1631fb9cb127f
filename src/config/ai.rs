// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_env_key() -> String {
    "ENV".to_string()
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_retry_budget() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_daily_limit() -> u32 {
    500
}
fn default_state_dir() -> PathBuf {
    PathBuf::from("state/llm")
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    2000
}

/// Language-model provider settings (`[llm]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub enabled: bool,
    /// "openai" | "qwen" | "openrouter" | "custom" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Chat-completions base URL; required for "custom", defaulted per provider otherwise.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read the provider's key variable (see `key_env_var`).
    #[serde(default = "default_env_key")]
    pub api_key: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    /// Extra attempts per call for transient failures.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            base_url: None,
            model: default_model(),
            api_key: default_env_key(),
            timeout_secs: default_llm_timeout(),
            retry_budget: default_retry_budget(),
            retry_backoff_ms: default_retry_backoff_ms(),
            daily_limit: default_daily_limit(),
            state_dir: default_state_dir(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl LlmSettings {
    pub fn key_env_var(&self) -> &'static str {
        match self.provider.as_str() {
            "openai" => "OPENAI_API_KEY",
            "qwen" => "DASHSCOPE_API_KEY",
            "openrouter" => "OPENROUTER_API_KEY",
            _ => "LLM_API_KEY",
        }
    }

    /// Base URL of the chat-completions API for the configured provider.
    pub fn endpoint_base(&self) -> anyhow::Result<String> {
        if let Some(url) = self.base_url.as_deref().filter(|u| !u.trim().is_empty()) {
            return Ok(url.trim_end_matches('/').to_string());
        }
        let base = match self.provider.as_str() {
            "openai" => "https://api.openai.com/v1",
            "qwen" => "https://dashscope.aliyuncs.com/compatible-mode/v1",
            "openrouter" => "https://openrouter.ai/api/v1",
            other => anyhow::bail!("provider `{other}` needs an explicit llm.base_url"),
        };
        Ok(base.to_string())
    }

    pub(crate) fn normalize(&mut self) -> anyhow::Result<()> {
        self.provider = self.provider.trim().to_lowercase();

        if self.enabled && self.api_key.trim().eq_ignore_ascii_case("env") {
            let var = self.key_env_var();
            self.api_key =
                env::var(var).map_err(|_| anyhow::anyhow!("Missing {var} env var"))?;
        }
        if self.enabled {
            // fail at load time rather than on the first report tick
            self.endpoint_base()?;
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            self.temperature = default_temperature();
        }
        self.timeout_secs = self.timeout_secs.max(1);
        self.max_tokens = self.max_tokens.max(16);
        Ok(())
    }
}

fn default_search_provider() -> String {
    "serpapi".to_string()
}
fn default_search_results() -> usize {
    5
}
fn default_search_timeout() -> u64 {
    15
}

/// Web-search collaborator settings (`[search]`), used by deep research only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_search_provider")]
    pub provider: String,
    /// "ENV" means: read SERPAPI_API_KEY.
    #[serde(default = "default_env_key")]
    pub api_key: String,
    #[serde(default = "default_search_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_search_provider(),
            api_key: default_env_key(),
            max_results: default_search_results(),
            timeout_secs: default_search_timeout(),
        }
    }
}

impl SearchSettings {
    pub(crate) fn normalize(&mut self) -> anyhow::Result<()> {
        self.provider = self.provider.trim().to_lowercase();
        if !self.enabled {
            return Ok(());
        }
        if self.provider != "serpapi" {
            anyhow::bail!("Unsupported search provider in config: {}", self.provider);
        }
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = env::var("SERPAPI_API_KEY")
                .map_err(|_| anyhow::anyhow!("Missing SERPAPI_API_KEY env var"))?;
        }
        self.max_results = self.max_results.clamp(1, 20);
        self.timeout_secs = self.timeout_secs.max(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_defaults_per_provider() {
        let mut s = LlmSettings {
            provider: "qwen".into(),
            ..Default::default()
        };
        assert!(s.endpoint_base().unwrap().contains("dashscope"));
        s.provider = "custom".into();
        assert!(s.endpoint_base().is_err());
        s.base_url = Some("http://localhost:11434/v1/".into());
        assert_eq!(s.endpoint_base().unwrap(), "http://localhost:11434/v1");
    }

    #[test]
    fn disabled_llm_does_not_need_a_key() {
        let mut s = LlmSettings {
            provider: " OpenAI ".into(),
            temperature: 9.0,
            ..Default::default()
        };
        s.normalize().unwrap();
        assert_eq!(s.provider, "openai");
        assert_eq!(s.api_key, "ENV");
        assert!((s.temperature - 0.3).abs() < f32::EPSILON);
    }
}
