//! Message classification and routing for ingested updates.
//!
//! Every text update is either a `/command` or a candidate answer to the
//! session's pending questions. Non-text updates and updates from senders
//! outside the allowlist are dropped.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::channels::{
    ChatTransport, FormatOptions, InboundUpdate, is_user_allowed, send_with_timeout,
};
use crate::conversation::{AnswerSet, ConversationStore, parse_numbered_answers};
use crate::error;
use crate::ingest::UpdateHandler;
use crate::reply::ReplyOrchestrator;

/// Sent when an answer arrives for a session with nothing pending.
pub const NO_ACTIVE_EMAIL_NOTICE: &str = "There is no active email waiting for answers right now. \
     New questions will show up here when an email needs a reply.";

/// Classification of one text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// `/name arg1 arg2`; name is lowercased with any `@botname` suffix removed.
    Command { name: String, args: Vec<String> },
    /// Anything else. `answers` may be empty when no line was numbered.
    Answers { text: String, answers: AnswerSet },
}

/// Classify raw message text.
pub fn classify(text: &str) -> Classified {
    if let Some(rest) = text.strip_prefix('/') {
        let mut tokens = rest.split_whitespace();
        let head = tokens.next().unwrap_or_default();
        let name = head.split('@').next().unwrap_or_default().to_lowercase();
        let args = tokens.map(String::from).collect();
        return Classified::Command { name, args };
    }

    Classified::Answers {
        text: text.to_string(),
        answers: parse_numbered_answers(text),
    }
}

/// Routes each update to the right place: commands are logged, answers are
/// correlated against the session's pending questions.
pub struct MessageRouter {
    store: Arc<ConversationStore>,
    transport: Arc<dyn ChatTransport>,
    orchestrator: Arc<ReplyOrchestrator>,
    allowed_users: Vec<String>,
}

impl MessageRouter {
    pub fn new(
        store: Arc<ConversationStore>,
        transport: Arc<dyn ChatTransport>,
        orchestrator: Arc<ReplyOrchestrator>,
        allowed_users: Vec<String>,
    ) -> Self {
        Self {
            store,
            transport,
            orchestrator,
            allowed_users,
        }
    }
}

#[async_trait]
impl UpdateHandler for MessageRouter {
    async fn handle(&self, update: InboundUpdate) -> error::Result<()> {
        let Some(text) = update.text.as_deref() else {
            debug!(update_id = update.update_id, "Dropping update without text");
            return Ok(());
        };

        if update.session_id.is_empty() {
            warn!(update_id = update.update_id, "Dropping text update without a chat id");
            return Ok(());
        }

        if !is_user_allowed(&self.allowed_users, update.identities()) {
            warn!(
                update_id = update.update_id,
                sender_id = %update.sender_id,
                username = update.sender_username.as_deref().unwrap_or("unknown"),
                "Ignoring message from unauthorized user"
            );
            return Ok(());
        }

        match classify(text) {
            Classified::Command { name, args } => {
                info!(
                    session_id = %update.session_id,
                    command = %name,
                    args = args.len(),
                    "Received command"
                );
                Ok(())
            }
            Classified::Answers { answers, .. } => {
                let Some(state) = self.store.get(&update.session_id).await else {
                    info!(session_id = %update.session_id, "Answer received with no pending email");
                    send_with_timeout(
                        &*self.transport,
                        &update.session_id,
                        NO_ACTIVE_EMAIL_NOTICE,
                        FormatOptions::Plain,
                        self.orchestrator.timeout(),
                    )
                    .await?;
                    return Ok(());
                };

                debug!(
                    session_id = %update.session_id,
                    parsed = answers.len(),
                    questions = state.questions.len(),
                    "Correlating answers"
                );
                self.orchestrator.handle_answers(state, &answers).await;
                Ok(())
            }
        }
    }
}
