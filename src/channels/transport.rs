//! Chat transport abstraction: what the ingestion loop and orchestrator need
//! from a chat provider.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// One message received from the chat provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundUpdate {
    /// Provider-assigned, monotonically increasing.
    pub update_id: i64,
    pub session_id: String,
    pub sender_id: String,
    /// Sender's username, when the provider exposes one.
    pub sender_username: Option<String>,
    /// `None` for updates without a text payload (stickers, photos, joins).
    pub text: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundUpdate {
    pub fn text(update_id: i64, session_id: &str, sender_id: &str, text: &str) -> Self {
        Self {
            update_id,
            session_id: session_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_username: None,
            text: Some(text.to_string()),
            received_at: Utc::now(),
        }
    }

    /// Identities usable for allowlist checks: numeric id, then username.
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.sender_id.as_str()).chain(self.sender_username.as_deref())
    }
}

/// Outbound message formatting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FormatOptions {
    /// Markdown first, falling back to plain text if the provider rejects it.
    #[default]
    Markdown,
    Plain,
}

/// Why a fetch failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Another poller is already consuming this bot's updates.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network failure, provider 5xx or malformed payload.
    #[error("transient: {0}")]
    Transient(String),
}

/// A chat provider capable of long-polling for updates and sending messages.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch updates with `update_id >= offset`, waiting up to `timeout_secs`.
    async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<InboundUpdate>, FetchError>;

    /// Remove any webhook so long-polling is permitted.
    async fn delete_webhook(&self) -> Result<(), ChannelError>;

    async fn send_message(
        &self,
        session_id: &str,
        text: &str,
        format: FormatOptions,
    ) -> Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identities_include_username_when_present() {
        let mut update = InboundUpdate::text(1, "chat", "123", "hi");
        assert_eq!(update.identities().collect::<Vec<_>>(), vec!["123"]);

        update.sender_username = Some("alice".into());
        assert_eq!(update.identities().collect::<Vec<_>>(), vec!["123", "alice"]);
    }
}
