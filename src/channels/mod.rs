//! Chat channel abstraction for update ingestion and outbound messages.

pub mod telegram;
pub mod transport;

pub use telegram::TelegramTransport;
pub use transport::{ChatTransport, FetchError, FormatOptions, InboundUpdate};

use std::time::Duration;

use crate::error::ChannelError;

/// Send through `transport`, failing with `ChannelError::Timeout` if the
/// provider hasn't answered within `limit`.
pub async fn send_with_timeout(
    transport: &dyn ChatTransport,
    session_id: &str,
    text: &str,
    format: FormatOptions,
    limit: Duration,
) -> Result<(), ChannelError> {
    tokio::time::timeout(limit, transport.send_message(session_id, text, format))
        .await
        .unwrap_or_else(|_| {
            Err(ChannelError::Timeout {
                name: transport.name().to_string(),
                timeout: limit,
            })
        })
}

/// Check if any identity matches the allowed users list (`*` allows everyone).
///
/// Matching is exact and case-sensitive; an empty list denies all.
pub fn is_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().filter(|id| !id.is_empty()).collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(users: &[&str]) -> Vec<String> {
        users.iter().map(|u| u.to_string()).collect()
    }

    struct StalledTransport;

    #[async_trait::async_trait]
    impl ChatTransport for StalledTransport {
        fn name(&self) -> &str {
            "stalled"
        }
        async fn get_updates(&self, _: i64, _: u64) -> Result<Vec<InboundUpdate>, FetchError> {
            Ok(vec![])
        }
        async fn delete_webhook(&self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn send_message(
            &self,
            _: &str,
            _: &str,
            _: FormatOptions,
        ) -> Result<(), ChannelError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_with_timeout_gives_up_on_stalled_transport() {
        let err = send_with_timeout(
            &StalledTransport,
            "chat-1",
            "hello",
            FormatOptions::Plain,
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ChannelError::Timeout { ref name, .. } if name == "stalled"));
    }

    #[test]
    fn user_allowed_wildcard() {
        assert!(is_user_allowed(&list(&["*"]), ["anyone"]));
    }

    #[test]
    fn user_allowed_specific() {
        let allowed = list(&["alice", "bob"]);
        assert!(is_user_allowed(&allowed, ["alice"]));
        assert!(!is_user_allowed(&allowed, ["eve"]));
    }

    #[test]
    fn user_denied_empty_list() {
        assert!(!is_user_allowed(&[], ["anyone"]));
    }

    #[test]
    fn user_exact_match_not_substring() {
        let allowed = list(&["alice"]);
        assert!(!is_user_allowed(&allowed, ["alice_bot"]));
        assert!(!is_user_allowed(&allowed, ["malice"]));
    }

    #[test]
    fn user_case_sensitive() {
        let allowed = list(&["Alice"]);
        assert!(is_user_allowed(&allowed, ["Alice"]));
        assert!(!is_user_allowed(&allowed, ["alice"]));
    }

    #[test]
    fn empty_identity_never_matches() {
        assert!(!is_user_allowed(&list(&["alice"]), [""]));
    }

    #[test]
    fn user_allowed_by_numeric_id_identity() {
        assert!(is_user_allowed(&list(&["123456789"]), ["unknown", "123456789"]));
        assert!(!is_user_allowed(&list(&["987654321"]), ["unknown", "123456789"]));
    }
}
