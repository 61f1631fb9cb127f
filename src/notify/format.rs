// src/notify/format.rs
//! Per-platform payload builders. Each `PlatformKind` owns its JSON shape, its length
//! limit and how it acknowledges a message.

use serde::Serialize;
use serde_json::json;

use crate::error::DeliveryError;
use crate::llm::truncate_chars;
use crate::model::PlatformKind;

const TRUNCATION_NOTICE: &str = "\n\n> *Content truncated; the full report is stored with the run.*";

/// Deep-research reports are sent as a digest of this many chars at most.
pub const DIGEST_MAX_CHARS: usize = 2000;

/// Markdown body limit, in chars, per platform.
pub fn max_chars(kind: PlatformKind) -> usize {
    match kind {
        PlatformKind::WeCom | PlatformKind::Kingsoft => 4000,
        PlatformKind::Discord => 4000,
        PlatformKind::Slack => 3000,
    }
}

/// Cut `content` to `limit` chars, leaving room for a notice that says so.
pub fn truncate_with_notice(content: &str, limit: usize) -> String {
    if content.chars().count() <= limit {
        return content.to_string();
    }
    let room = limit.saturating_sub(TRUNCATION_NOTICE.chars().count());
    let mut out = truncate_chars(content, room).trim_end().to_string();
    out.push_str(TRUNCATION_NOTICE);
    out
}

/// Sections appended after the synthesized text of a deep report.
const TRAILING_SECTIONS: [&str; 2] = ["## Research notes", "## Sources"];

/// Title line plus the synthesized body, stopping at the trailing notes and sources.
/// Header metadata (`_..._` lines and `>` quotes) does not count towards the body.
pub fn digest(content: &str) -> String {
    let mut out = Vec::new();
    let mut body_lines = 0usize;
    for line in content.lines() {
        if TRAILING_SECTIONS.iter().any(|h| line.trim_end() == *h) {
            break;
        }
        let trimmed = line.trim();
        let metadata = trimmed.starts_with('#') || trimmed.starts_with('>') || trimmed.starts_with('_');
        if !trimmed.is_empty() && !metadata {
            body_lines += 1;
        }
        out.push(line);
        if body_lines >= 24 {
            break;
        }
    }
    truncate_with_notice(out.join("\n").trim_end(), DIGEST_MAX_CHARS)
}

#[derive(Serialize)]
struct DiscordEmbed<'a> {
    title: &'a str,
    description: &'a str,
}

/// Build the webhook body for `kind`. `deep` selects the digest form.
pub fn build_payload(kind: PlatformKind, title: &str, content: &str, deep: bool) -> serde_json::Value {
    let body = if deep {
        digest(content)
    } else {
        content.to_string()
    };
    let body = truncate_with_notice(&body, max_chars(kind));

    match kind {
        PlatformKind::WeCom => json!({
            "msgtype": "markdown",
            "markdown": { "content": body }
        }),
        PlatformKind::Kingsoft => json!({
            "msgtype": "markdown",
            "markdown": { "text": body }
        }),
        PlatformKind::Discord => json!({
            "content": null,
            "embeds": [DiscordEmbed { title: truncate_chars(title, 256), description: &body }]
        }),
        PlatformKind::Slack => json!({
            "text": title,
            "blocks": [
                { "type": "section", "text": { "type": "mrkdwn", "text": body } }
            ]
        }),
    }
}

/// Platform-level acceptance check for a 2xx response. WeCom answers 200 with
/// `errcode != 0` when it rejects a message.
pub fn verify_ack(kind: PlatformKind, body: &str) -> Result<(), DeliveryError> {
    match kind {
        PlatformKind::WeCom => {
            let v: serde_json::Value = serde_json::from_str(body).map_err(|_| {
                DeliveryError::Permanent("wecom: unreadable acknowledgement".to_string())
            })?;
            let code = v.get("errcode").and_then(|c| c.as_i64()).unwrap_or(-1);
            if code == 0 {
                Ok(())
            } else {
                let msg = v.get("errmsg").and_then(|m| m.as_str()).unwrap_or("unknown");
                Err(DeliveryError::Permanent(format!("wecom errcode {code}: {msg}")))
            }
        }
        PlatformKind::Kingsoft | PlatformKind::Discord | PlatformKind::Slack => Ok(()),
    }
}
