// src/search.rs
//! Web-search capability for deep research. Results only add context; a failed search
//! never fails a research question on its own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::config::SearchSettings;
use crate::error::SearchError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub url: String,
    /// Host of `url`, for attribution.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub date: Option<String>,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

/// Used when `[search]` is disabled.
pub struct NoSearch;

#[async_trait]
impl WebSearch for NoSearch {
    async fn search(&self, _query: &str) -> Result<Vec<SearchHit>, SearchError> {
        Err(SearchError::NotConfigured)
    }
}

const SERPAPI_ENDPOINT: &str = "https://serpapi.com/search.json";

pub struct SerpApiSearch {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_results: usize,
}

impl SerpApiSearch {
    pub fn from_settings(settings: &SearchSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: SERPAPI_ENDPOINT.to_string(),
            api_key: settings.api_key.clone(),
            max_results: settings.max_results,
        })
    }
}

#[async_trait]
impl WebSearch for SerpApiSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let num = self.max_results.to_string();
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("num", num.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SearchError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(SearchError::Status(resp.status().as_u16()));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SearchError::Decode(e.to_string()))?;
        Ok(parse_organic_results(&body, self.max_results))
    }
}

/// Pull hits out of a SerpAPI `organic_results` array. Google redirect links
/// (`...?url=<target>`) are unwrapped to the target.
pub fn parse_organic_results(body: &serde_json::Value, limit: usize) -> Vec<SearchHit> {
    let Some(results) = body.get("organic_results").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    let str_field = |r: &serde_json::Value, k: &str| {
        r.get(k)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };

    results
        .iter()
        .filter_map(|r| {
            let link = r
                .get("link")
                .or_else(|| r.get("redirect_link"))
                .and_then(|v| v.as_str())?;
            let url = unwrap_redirect(link);
            let source = Url::parse(&url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_default();
            Some(SearchHit {
                title: str_field(r, "title"),
                snippet: str_field(r, "snippet"),
                url,
                source,
                date: r.get("date").and_then(|v| v.as_str()).map(str::to_string),
            })
        })
        .take(limit)
        .collect()
}

fn unwrap_redirect(link: &str) -> String {
    Url::parse(link)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "url")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or_else(|| link.to_string())
}
