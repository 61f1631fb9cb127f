// src/notify/webhook.rs
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::config::DeliverySettings;
use crate::error::DeliveryError;

/// What came back from a 2xx POST; platforms may still reject inside the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookAck {
    pub status: u16,
    pub body: String,
}

/// Outbound webhook capability. One attempt per call; retries belong to the dispatcher.
#[async_trait]
pub trait WebhookPoster: Send + Sync {
    async fn post(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookAck, DeliveryError>;
}

#[derive(Clone)]
pub struct HttpWebhook {
    client: Client,
    timeout: Duration,
}

impl HttpWebhook {
    pub fn new(settings: &DeliverySettings) -> anyhow::Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            timeout: Duration::from_secs(settings.timeout_secs),
        })
    }
}

/// 429 and 5xx are worth another attempt; any other non-2xx is final.
pub fn classify_status(status: u16) -> Option<DeliveryError> {
    match status {
        200..=299 => None,
        429 | 500..=599 => Some(DeliveryError::Transient(format!("http {status}"))),
        _ => Some(DeliveryError::Permanent(format!("http {status}"))),
    }
}

#[async_trait]
impl WebhookPoster for HttpWebhook {
    async fn post(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookAck, DeliveryError> {
        let res = self
            .client
            .post(endpoint)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await;

        let rsp = match res {
            Ok(rsp) => rsp,
            Err(e) if e.is_builder() => {
                return Err(DeliveryError::Permanent(format!("bad endpoint: {e}")))
            }
            Err(e) if e.is_timeout() => {
                return Err(DeliveryError::Transient(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
            Err(e) => return Err(DeliveryError::Transient(format!("request failed: {e}"))),
        };

        let status = rsp.status().as_u16();
        if let Some(err) = classify_status(status) {
            return Err(err);
        }
        let body = rsp.text().await.unwrap_or_default();
        Ok(WebhookAck { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(classify_status(204), None);
        assert!(classify_status(500).unwrap().is_transient());
        assert!(classify_status(503).unwrap().is_transient());
        assert!(classify_status(429).unwrap().is_transient());
        assert!(!classify_status(404).unwrap().is_transient());
        assert!(!classify_status(400).unwrap().is_transient());
    }
}
