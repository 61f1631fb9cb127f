// src/notify/mod.rs
//! Delivery dispatcher: push a finished report to each destination, independently.

pub mod format;
pub mod webhook;

use futures::future::join_all;
use metrics::counter;
use std::time::Duration;
use url::Url;

use crate::config::DeliverySettings;
use crate::error::{DeliveryError, StoreError};
use crate::metrics::ensure_metrics_described;
use crate::model::{Destination, DestinationId, DeliveryOutcome, DeliveryRecord, PlatformKind};
use crate::store::Store;
use webhook::WebhookPoster;

/// What a destination receives.
#[derive(Debug, Clone)]
pub struct Outgoing<'a> {
    pub title: &'a str,
    pub content: &'a str,
    /// Deep-research reports go out as a digest.
    pub deep: bool,
}

pub struct Dispatcher<'a> {
    store: &'a dyn Store,
    poster: &'a dyn WebhookPoster,
    settings: &'a DeliverySettings,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        store: &'a dyn Store,
        poster: &'a dyn WebhookPoster,
        settings: &'a DeliverySettings,
    ) -> Self {
        Self {
            store,
            poster,
            settings,
        }
    }

    /// Deliver to every listed destination concurrently. Unknown ids come back as
    /// `failed`; disabled destinations are skipped without a record.
    pub async fn deliver(&self, msg: &Outgoing<'_>, ids: &[DestinationId]) -> Vec<DeliveryRecord> {
        ensure_metrics_described();
        let jobs = ids.iter().map(|&id| self.deliver_one(msg, id));
        join_all(jobs).await.into_iter().flatten().collect()
    }

    async fn deliver_one(&self, msg: &Outgoing<'_>, id: DestinationId) -> Option<DeliveryRecord> {
        let dest = match self.store.get_destination(id).await {
            Ok(d) => d,
            Err(StoreError::NotFound { .. }) => {
                tracing::warn!(target: "notify", destination_id = id, "unknown destination");
                return Some(DeliveryRecord {
                    destination_id: id,
                    outcome: DeliveryOutcome::Failed(format!("unknown destination {id}")),
                    attempts: 0,
                });
            }
            Err(e) => {
                return Some(DeliveryRecord {
                    destination_id: id,
                    outcome: DeliveryOutcome::Failed(e.to_string()),
                    attempts: 0,
                })
            }
        };
        if !dest.enabled {
            tracing::debug!(target: "notify", destination_id = id, "destination disabled; skipping");
            return None;
        }
        Some(self.push(&dest, msg).await)
    }

    async fn push(&self, dest: &Destination, msg: &Outgoing<'_>) -> DeliveryRecord {
        let platform = platform_label(dest.kind);
        let mut attempts: u32 = 0;

        let result = match Url::parse(&dest.webhook) {
            Err(e) => Err(DeliveryError::Permanent(format!("malformed endpoint: {e}"))),
            Ok(_) => {
                let payload = format::build_payload(dest.kind, msg.title, msg.content, msg.deep);
                loop {
                    attempts += 1;
                    counter!("delivery_attempts_total", "platform" => platform).increment(1);
                    let res = match self.poster.post(&dest.webhook, &payload).await {
                        Ok(ack) => format::verify_ack(dest.kind, &ack.body),
                        Err(e) => Err(e),
                    };
                    match res {
                        Err(e) if e.is_transient() && attempts <= self.settings.max_retries => {
                            tracing::debug!(
                                target: "notify",
                                destination_id = dest.id,
                                attempt = attempts,
                                error = %e,
                                "transient delivery failure, retrying"
                            );
                            tokio::time::sleep(self.backoff(attempts)).await;
                        }
                        other => break other,
                    }
                }
            }
        };

        let outcome = match result {
            Ok(()) => {
                counter!("delivery_outcomes_total", "platform" => platform, "outcome" => "delivered")
                    .increment(1);
                tracing::info!(target: "notify", destination_id = dest.id, platform, attempts, "delivered");
                DeliveryOutcome::Delivered
            }
            Err(e) => {
                counter!("delivery_outcomes_total", "platform" => platform, "outcome" => "failed")
                    .increment(1);
                tracing::warn!(
                    target: "notify",
                    destination_id = dest.id,
                    platform,
                    attempts,
                    error = %e,
                    "delivery failed"
                );
                DeliveryOutcome::Failed(e.reason().to_string())
            }
        };
        DeliveryRecord {
            destination_id: dest.id,
            outcome,
            attempts,
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.settings.backoff_base_ms.saturating_mul(1u64 << (attempt - 1).min(10)))
    }

    /// Send a short connectivity message to one destination (admin "test webhook").
    pub async fn send_test(&self, id: DestinationId, now: chrono::DateTime<chrono::Utc>) -> DeliveryRecord {
        let content = format!(
            "## Test message\n\nsource-digest can reach this webhook.\n\n> Sent at {} UTC",
            now.format("%Y-%m-%d %H:%M:%S")
        );
        let msg = Outgoing {
            title: "Test message",
            content: &content,
            deep: false,
        };
        match self.deliver_one(&msg, id).await {
            Some(rec) => rec,
            None => DeliveryRecord {
                destination_id: id,
                outcome: DeliveryOutcome::Failed("destination disabled".to_string()),
                attempts: 0,
            },
        }
    }
}

fn platform_label(kind: PlatformKind) -> &'static str {
    match kind {
        PlatformKind::WeCom => "wecom",
        PlatformKind::Kingsoft => "kingsoft",
        PlatformKind::Discord => "discord",
        PlatformKind::Slack => "slack",
    }
}
