// src/fetch.rs
use async_trait::async_trait;
use std::time::Duration;

use crate::config::CrawlSettings;
use crate::error::FetchError;

/// Page-fetch capability used by the crawl executor and the preview actions.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// reqwest-backed fetcher. Non-2xx responses are errors; redirects are followed.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    pub fn new(settings: &CrawlSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .gzip(true)
            .connect_timeout(Duration::from_secs(settings.fetch_timeout_secs.min(10)))
            .timeout(Duration::from_secs(settings.fetch_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            timeout_secs: settings.fetch_timeout_secs,
        })
    }

    fn map_err(&self, url: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                secs: self.timeout_secs,
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_err(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        resp.text().await.map_err(|e| self.map_err(url, e))
    }
}
