//! Conversation data model: one pending question set per chat session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder used when the originating email has no subject.
pub const PLACEHOLDER_SUBJECT: &str = "[No Subject]";
/// Placeholder used when the originating email has no sender.
pub const PLACEHOLDER_SENDER: &str = "[Unknown Sender]";
/// Placeholder used when the originating email has no thread id.
pub const PLACEHOLDER_THREAD: &str = "[No Thread]";

/// The email a question set was derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginatingEmail {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub thread_id: String,
}

/// Fields that were replaced by placeholders in [`OriginatingEmail::sanitized`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Substitutions {
    pub sender: bool,
    pub subject: bool,
    pub body: bool,
    pub thread_id: bool,
}

impl Substitutions {
    pub fn any(&self) -> bool {
        self.sender || self.subject || self.body || self.thread_id
    }
}

impl OriginatingEmail {
    pub fn new(
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        thread_id: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            thread_id: thread_id.into(),
        }
    }

    /// Copy with blank fields replaced by placeholders.
    ///
    /// The body is left empty rather than invented.
    pub fn sanitized(&self) -> (Self, Substitutions) {
        let mut subs = Substitutions::default();

        let pick = |value: &str, placeholder: &str, flag: &mut bool| {
            if value.trim().is_empty() {
                *flag = true;
                placeholder.to_string()
            } else {
                value.to_string()
            }
        };

        let sender = pick(&self.sender, PLACEHOLDER_SENDER, &mut subs.sender);
        let subject = pick(&self.subject, PLACEHOLDER_SUBJECT, &mut subs.subject);
        let thread_id = pick(&self.thread_id, PLACEHOLDER_THREAD, &mut subs.thread_id);
        let body = if self.body.trim().is_empty() {
            subs.body = true;
            String::new()
        } else {
            self.body.clone()
        };

        (
            Self {
                sender,
                subject,
                body,
                thread_id,
            },
            subs,
        )
    }
}

/// A chat session's outstanding question set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_id: String,
    pub email: OriginatingEmail,
    /// Matched against answers by 1-based position.
    pub questions: Vec<String>,
    /// Stamped by the store on insert.
    pub created_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(
        session_id: impl Into<String>,
        email: OriginatingEmail,
        questions: Vec<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            email,
            questions,
            created_at: Utc::now(),
        }
    }
}

/// Diagnostic view of a stored conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub session_id: String,
    pub subject: String,
    pub question_count: usize,
    pub age_seconds: i64,
}
