//! Telegram transport: Bot API long-polling and message sending.
//!
//! Native Rust Telegram Bot API client implementing [`ChatTransport`].
//! The poll loop itself lives in `ingest::poller`; this module only
//! performs single requests and decodes their payloads.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::transport::{ChatTransport, FetchError, FormatOptions, InboundUpdate};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Extra client-side slack on top of the provider long-poll timeout.
const REQUEST_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram transport: talks to the Bot API over HTTPS.
pub struct TelegramTransport {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramTransport {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the transport at a different Bot API server (local bot API, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// Send a single message chunk (≤4096 chars), Markdown-first with fallback.
    async fn send_chunk(
        &self,
        chat_id: &str,
        text: &str,
        format: FormatOptions,
    ) -> Result<(), ChannelError> {
        if format == FormatOptions::Markdown {
            let markdown_body = serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "Markdown"
            });

            let markdown_resp = self
                .client
                .post(self.api_url("sendMessage"))
                .json(&markdown_body)
                .send()
                .await
                .map_err(|e| ChannelError::SendFailed {
                    name: "telegram".into(),
                    reason: e.to_string(),
                })?;

            if markdown_resp.status().is_success() {
                return Ok(());
            }

            tracing::warn!(
                status = ?markdown_resp.status(),
                "Telegram sendMessage with Markdown failed; retrying without parse_mode"
            );
        }

        let plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !plain_resp.status().is_success() {
            let status = plain_resp.status();
            let err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage failed ({status}): {err}"),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<InboundUpdate>, FetchError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"]
        });

        let resp = self
            .client
            .post(self.api_url("getUpdates"))
            .timeout(Duration::from_secs(timeout_secs) + REQUEST_TIMEOUT_SLACK)
            .json(&body)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = resp.status();
        let envelope: Result<ApiResponse, _> = resp.json().await;
        classify_response(status, envelope.map_err(|e| e.to_string()))
    }

    async fn delete_webhook(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(self.api_url("deleteWebhook"))
            .json(&serde_json::json!({ "drop_pending_updates": false }))
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::Http(format!(
                "deleteWebhook returned {}",
                resp.status()
            )))
        }
    }

    async fn send_message(
        &self,
        session_id: &str,
        text: &str,
        format: FormatOptions,
    ) -> Result<(), ChannelError> {
        if session_id.is_empty() {
            return Err(ChannelError::InvalidMessage("empty chat id".into()));
        }
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_chunk(session_id, &chunk, format).await?;
        }
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Map an HTTP status + decoded envelope onto updates or a [`FetchError`].
fn classify_response(
    status: StatusCode,
    envelope: Result<ApiResponse, String>,
) -> Result<Vec<InboundUpdate>, FetchError> {
    let envelope = match envelope {
        Ok(env) => env,
        Err(e) if status == StatusCode::CONFLICT => return Err(FetchError::Conflict(e)),
        Err(e) => {
            return Err(FetchError::Transient(format!(
                "malformed getUpdates payload ({status}): {e}"
            )));
        }
    };

    if status == StatusCode::CONFLICT || envelope.error_code == Some(409) {
        return Err(FetchError::Conflict(
            envelope
                .description
                .unwrap_or_else(|| "terminated by other getUpdates request".into()),
        ));
    }

    if !envelope.ok || !status.is_success() {
        return Err(FetchError::Transient(format!(
            "getUpdates failed ({status}): {}",
            envelope.description.unwrap_or_default()
        )));
    }

    let results = envelope
        .result
        .as_ref()
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| FetchError::Transient("getUpdates result is not an array".into()))?;

    Ok(results.iter().filter_map(decode_update).collect())
}

/// Decode one raw update. Updates without an `update_id` can't be
/// acknowledged and are dropped; updates without a message keep `text: None`.
fn decode_update(update: &serde_json::Value) -> Option<InboundUpdate> {
    let Some(update_id) = update.get("update_id").and_then(serde_json::Value::as_i64) else {
        tracing::warn!("Telegram: dropping update without update_id");
        return None;
    };

    let message = update.get("message");
    let field = |path: &[&str]| {
        path.iter()
            .try_fold(message?, |v, key| v.get(*key))
            .cloned()
    };

    let session_id = field(&["chat", "id"])
        .and_then(|v| v.as_i64())
        .map(|id| id.to_string())
        .unwrap_or_default();
    let sender_id = field(&["from", "id"])
        .and_then(|v| v.as_i64())
        .map(|id| id.to_string())
        .unwrap_or_default();
    let sender_username = field(&["from", "username"]).and_then(|v| v.as_str().map(String::from));
    let text = field(&["text"]).and_then(|v| v.as_str().map(String::from));
    let received_at = field(&["date"])
        .and_then(|v| v.as_i64())
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now);

    Some(InboundUpdate {
        update_id,
        session_id,
        sender_id,
        sender_username,
        text,
        received_at,
    })
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut cut = max_len;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        let chunk = &remaining[..cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(cut);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(json: serde_json::Value) -> Result<ApiResponse, String> {
        serde_json::from_value(json).map_err(|e| e.to_string())
    }

    #[test]
    fn telegram_api_url() {
        let ch = TelegramTransport::new(SecretString::from("123:ABC"));
        assert_eq!(
            ch.api_url("getUpdates"),
            "https://api.telegram.org/bot123:ABC/getUpdates"
        );
    }

    #[test]
    fn telegram_api_url_custom_base() {
        let ch =
            TelegramTransport::new(SecretString::from("t")).with_api_base("http://localhost:8081/");
        assert_eq!(ch.api_url("getMe"), "http://localhost:8081/bott/getMe");
    }

    // ── Response classification ─────────────────────────────────────

    #[test]
    fn classify_success_decodes_messages() {
        let env = envelope(serde_json::json!({
            "ok": true,
            "result": [{
                "update_id": 7,
                "message": {
                    "date": 1_700_000_000,
                    "chat": {"id": -100},
                    "from": {"id": 55, "username": "alice"},
                    "text": "1. yes"
                }
            }]
        }));

        let updates = classify_response(StatusCode::OK, env).unwrap();
        assert_eq!(updates.len(), 1);
        let u = &updates[0];
        assert_eq!(u.update_id, 7);
        assert_eq!(u.session_id, "-100");
        assert_eq!(u.sender_id, "55");
        assert_eq!(u.sender_username.as_deref(), Some("alice"));
        assert_eq!(u.text.as_deref(), Some("1. yes"));
        assert_eq!(u.received_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn classify_conflict_by_status() {
        let env = envelope(serde_json::json!({
            "ok": false,
            "error_code": 409,
            "description": "Conflict: terminated by other getUpdates request"
        }));
        let err = classify_response(StatusCode::CONFLICT, env).unwrap_err();
        assert!(matches!(err, FetchError::Conflict(ref d) if d.contains("other getUpdates")));
    }

    #[test]
    fn classify_conflict_by_error_code_only() {
        let env = envelope(serde_json::json!({"ok": false, "error_code": 409}));
        let err = classify_response(StatusCode::OK, env).unwrap_err();
        assert!(matches!(err, FetchError::Conflict(_)));
    }

    #[test]
    fn classify_server_error_is_transient() {
        let env = envelope(serde_json::json!({
            "ok": false,
            "error_code": 502,
            "description": "Bad Gateway"
        }));
        let err = classify_response(StatusCode::BAD_GATEWAY, env).unwrap_err();
        assert!(matches!(err, FetchError::Transient(_)));
    }

    #[test]
    fn classify_malformed_payload_is_transient() {
        let err = classify_response(StatusCode::OK, Err("expected value".into())).unwrap_err();
        assert!(matches!(err, FetchError::Transient(_)));
    }

    #[test]
    fn classify_non_array_result_is_transient() {
        let env = envelope(serde_json::json!({"ok": true, "result": {"nope": 1}}));
        assert!(matches!(
            classify_response(StatusCode::OK, env),
            Err(FetchError::Transient(_))
        ));
    }

    // ── Update decoding ─────────────────────────────────────────────

    #[test]
    fn decode_update_without_message_keeps_id() {
        let u = decode_update(&serde_json::json!({"update_id": 3, "edited_message": {}})).unwrap();
        assert_eq!(u.update_id, 3);
        assert!(u.text.is_none());
        assert!(u.session_id.is_empty());
    }

    #[test]
    fn decode_update_without_id_is_dropped() {
        assert!(decode_update(&serde_json::json!({"message": {"text": "hi"}})).is_none());
    }

    #[test]
    fn decode_non_text_message() {
        let u = decode_update(&serde_json::json!({
            "update_id": 9,
            "message": {"chat": {"id": 1}, "from": {"id": 2}, "sticker": {}}
        }))
        .unwrap();
        assert_eq!(u.session_id, "1");
        assert!(u.text.is_none());
    }

    // ── Network error tests (expected to fail with no server) ───────

    #[tokio::test]
    async fn send_message_rejects_empty_chat_id() {
        let ch = TelegramTransport::new(SecretString::from("fake-token"));
        let err = ch.send_message("", "hi", FormatOptions::Plain).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn get_updates_unreachable_server_is_transient() {
        let ch = TelegramTransport::new(SecretString::from("fake-token"))
            .with_api_base("http://127.0.0.1:9");
        let err = ch.get_updates(0, 1).await.unwrap_err();
        assert!(matches!(err, FetchError::Transient(_)));
    }

    // ── Message splitting tests ─────────────────────────────────────

    #[test]
    fn split_message_short() {
        let chunks = split_message("Hello", 4096);
        assert_eq!(chunks, vec!["Hello"]);
    }

    #[test]
    fn split_message_exact_limit() {
        let msg = "a".repeat(4096);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 4096);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks, vec!["a".repeat(2000), "b".repeat(3000)]);
    }

    #[test]
    fn split_message_no_good_split_point() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_respects_char_boundaries() {
        let msg = "é".repeat(3000);
        let chunks = split_message(&msg, 4095);
        assert!(chunks.iter().all(|c| c.len() <= 4095));
        assert_eq!(chunks.concat(), msg);
    }
}
