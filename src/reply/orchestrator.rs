//! Reply orchestration: from correlated answers to a sent reply and a saved draft.
//!
//! Pending state is consumed as soon as a reply has been generated; what
//! happens to delivery and drafting afterwards doesn't bring it back. If
//! generation fails, the state stays so the user can answer again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use super::drafts::DraftStore;
use super::generator::ReplyGenerator;
use crate::channels::{ChatTransport, FormatOptions, send_with_timeout};
use crate::conversation::{
    AnswerSet, ConversationState, ConversationStore, match_answers_to_questions,
};
use crate::error::{ChannelError, DraftError, LlmError};

/// Default bound for each collaborator call.
pub const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(60);

/// How a correlation attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Reply generated and saved as a draft.
    Drafted { draft_id: String },
    /// Reply generated, but saving the draft failed.
    DraftFailed { reason: String },
    /// Generation failed; pending state left in place.
    GenerationFailed { reason: String },
}

/// Drives generation → delivery → drafting for one answered conversation.
pub struct ReplyOrchestrator {
    store: Arc<ConversationStore>,
    transport: Arc<dyn ChatTransport>,
    generator: Arc<dyn ReplyGenerator>,
    drafts: Arc<dyn DraftStore>,
    timeout: Duration,
}

impl ReplyOrchestrator {
    pub fn new(
        store: Arc<ConversationStore>,
        transport: Arc<dyn ChatTransport>,
        generator: Arc<dyn ReplyGenerator>,
        drafts: Arc<dyn DraftStore>,
    ) -> Self {
        Self {
            store,
            transport,
            generator,
            drafts,
            timeout: DEFAULT_COLLABORATOR_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Bound applied to each collaborator call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Correlate `answers` with `state` and produce a reply.
    pub async fn handle_answers(
        &self,
        state: ConversationState,
        answers: &AnswerSet,
    ) -> ReplyOutcome {
        let session_id = state.session_id.as_str();
        let correlated = match_answers_to_questions(&state.questions, answers);

        let (email, subs) = state.email.sanitized();
        if subs.any() {
            warn!(
                session_id = %session_id,
                sender = subs.sender,
                subject = subs.subject,
                body = subs.body,
                thread_id = subs.thread_id,
                "Originating email had missing fields; using placeholders"
            );
        }

        info!(
            session_id = %session_id,
            answered = correlated.len(),
            questions = state.questions.len(),
            "Generating reply"
        );

        let generated = bounded(self.timeout, self.generator.generate(&email, &correlated))
            .await
            .unwrap_or_else(|| Err(LlmError::Timeout(self.timeout)));

        let reply = match generated {
            Ok(reply) => reply,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Reply generation failed");
                self.notify(
                    session_id,
                    &format!(
                        "⚠️ I couldn't generate a reply to \"{}\". \
                         Your answers are still saved, so you can send them again.",
                        email.subject
                    ),
                )
                .await;
                return ReplyOutcome::GenerationFailed {
                    reason: e.to_string(),
                };
            }
        };

        // Consumed once a reply exists, whatever happens next.
        self.store.clear(session_id).await;

        let message = format!(
            "✉️ *Reply to:* {}\n*To:* {}\n\n{}",
            email.subject, email.sender, reply.reply_text
        );
        if let Err(e) = self.send(session_id, &message, FormatOptions::Markdown).await {
            error!(session_id = %session_id, error = %e, "Failed to deliver generated reply");
        }

        let drafted = bounded(
            self.timeout,
            self.drafts
                .create_draft(&email.thread_id, &email.sender, &email.subject, &reply.reply_text),
        )
        .await
        .unwrap_or_else(|| Err(DraftError::Timeout(self.timeout)));

        match drafted {
            Ok(draft_id) => {
                info!(session_id = %session_id, draft_id = %draft_id, "Reply saved as draft");
                self.notify(
                    session_id,
                    "📝 Draft saved. Review it in your mailbox before sending.",
                )
                .await;
                ReplyOutcome::Drafted { draft_id }
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to save draft");
                self.notify(
                    session_id,
                    &format!(
                        "⚠️ The draft could not be saved ({e}). \
                         The reply above is still yours to copy."
                    ),
                )
                .await;
                ReplyOutcome::DraftFailed {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn send(
        &self,
        session_id: &str,
        text: &str,
        format: FormatOptions,
    ) -> Result<(), ChannelError> {
        send_with_timeout(&*self.transport, session_id, text, format, self.timeout).await
    }

    /// Plain-text follow-up; failures are logged only.
    async fn notify(&self, session_id: &str, text: &str) {
        if let Err(e) = self.send(session_id, text, FormatOptions::Plain).await {
            warn!(session_id = %session_id, error = %e, "Failed to send notice");
        }
    }
}

/// `None` if `fut` didn't finish within `limit`.
async fn bounded<F: Future>(limit: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(limit, fut).await.ok()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::channels::{FetchError, InboundUpdate};
    use crate::conversation::{CorrelatedAnswers, OriginatingEmail, parse_numbered_answers};
    use crate::reply::generator::GeneratedReply;

    #[derive(Default)]
    struct FakeTransport {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        fn name(&self) -> &str {
            "fake"
        }
        async fn get_updates(&self, _: i64, _: u64) -> Result<Vec<InboundUpdate>, FetchError> {
            Ok(vec![])
        }
        async fn delete_webhook(&self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn send_message(
            &self,
            session_id: &str,
            text: &str,
            _: FormatOptions,
        ) -> Result<(), ChannelError> {
            self.sent
                .lock()
                .unwrap()
                .push((session_id.to_string(), text.to_string()));
            if self.fail {
                return Err(ChannelError::Http("down".into()));
            }
            Ok(())
        }
    }

    enum GenMode {
        Ok,
        Fail,
        Hang,
    }

    struct FakeGenerator {
        mode: GenMode,
        seen: Mutex<Vec<(OriginatingEmail, CorrelatedAnswers)>>,
    }

    impl FakeGenerator {
        fn new(mode: GenMode) -> Self {
            Self {
                mode,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReplyGenerator for FakeGenerator {
        async fn generate(
            &self,
            email: &OriginatingEmail,
            answers: &CorrelatedAnswers,
        ) -> Result<GeneratedReply, LlmError> {
            self.seen.lock().unwrap().push((email.clone(), answers.clone()));
            match self.mode {
                GenMode::Ok => Ok(GeneratedReply {
                    reply_text: "Thursday works for me.".into(),
                }),
                GenMode::Fail => Err(LlmError::RequestFailed {
                    provider: "fake".into(),
                    reason: "overloaded".into(),
                }),
                GenMode::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }
    }

    struct FakeDrafts {
        fail: bool,
        calls: Mutex<Vec<(String, String, String, String)>>,
    }

    impl FakeDrafts {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DraftStore for FakeDrafts {
        async fn create_draft(
            &self,
            thread_id: &str,
            sender: &str,
            subject: &str,
            body: &str,
        ) -> Result<String, DraftError> {
            self.calls.lock().unwrap().push((
                thread_id.into(),
                sender.into(),
                subject.into(),
                body.into(),
            ));
            if self.fail {
                Err(DraftError::Imap("mailbox full".into()))
            } else {
                Ok("draft-1".into())
            }
        }
    }

    struct Harness {
        store: Arc<ConversationStore>,
        transport: Arc<FakeTransport>,
        generator: Arc<FakeGenerator>,
        drafts: Arc<FakeDrafts>,
        orchestrator: ReplyOrchestrator,
    }

    fn harness(mode: GenMode, draft_fail: bool, send_fail: bool) -> Harness {
        let store = ConversationStore::new();
        let transport = Arc::new(FakeTransport {
            fail: send_fail,
            ..Default::default()
        });
        let generator = Arc::new(FakeGenerator::new(mode));
        let drafts = Arc::new(FakeDrafts::new(draft_fail));
        let orchestrator = ReplyOrchestrator::new(
            Arc::clone(&store),
            transport.clone(),
            generator.clone(),
            drafts.clone(),
        )
        .with_timeout(Duration::from_millis(200));
        Harness {
            store,
            transport,
            generator,
            drafts,
            orchestrator,
        }
    }

    async fn pending(h: &Harness, email: OriginatingEmail) -> ConversationState {
        let state = ConversationState::new(
            "chat-1",
            email,
            vec!["Free Thursday?".into(), "Budget?".into()],
        );
        h.store.store("chat-1", state).await;
        h.store.get("chat-1").await.unwrap()
    }

    fn email() -> OriginatingEmail {
        OriginatingEmail::new("bob@example.com", "Lunch", "Are you free?", "<t1@example.com>")
    }

    #[tokio::test]
    async fn success_sends_reply_saves_draft_and_clears_state() {
        let h = harness(GenMode::Ok, false, false);
        let state = pending(&h, email()).await;

        let outcome = h
            .orchestrator
            .handle_answers(state, &parse_numbered_answers("1. yes\n7. ignored"))
            .await;

        assert_eq!(outcome, ReplyOutcome::Drafted { draft_id: "draft-1".into() });
        assert!(h.store.get("chat-1").await.is_none());

        let seen = h.generator.seen.lock().unwrap();
        assert_eq!(seen[0].1, CorrelatedAnswers::from([("Free Thursday?", "yes")]));

        let sent = h.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].1.contains("Thursday works for me."));
        assert!(sent[1].1.contains("Draft saved"));

        let calls = h.drafts.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            (
                "<t1@example.com>".to_string(),
                "bob@example.com".to_string(),
                "Lunch".to_string(),
                "Thursday works for me.".to_string()
            )
        );
    }

    #[tokio::test]
    async fn generation_failure_keeps_state_and_reports_error() {
        let h = harness(GenMode::Fail, false, false);
        let state = pending(&h, email()).await;

        let outcome = h.orchestrator.handle_answers(state, &parse_numbered_answers("1. yes")).await;

        assert!(matches!(outcome, ReplyOutcome::GenerationFailed { .. }));
        assert!(h.store.get("chat-1").await.is_some());
        assert!(h.drafts.calls.lock().unwrap().is_empty());

        let sent = h.transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("couldn't generate"));
    }

    #[tokio::test]
    async fn generation_timeout_counts_as_failure() {
        let h = harness(GenMode::Hang, false, false);
        let state = pending(&h, email()).await;

        let outcome = h.orchestrator.handle_answers(state, &AnswerSet::new()).await;

        assert!(matches!(
            outcome,
            ReplyOutcome::GenerationFailed { ref reason } if reason.contains("timed out")
        ));
        assert!(h.store.get("chat-1").await.is_some());
    }

    #[tokio::test]
    async fn draft_failure_still_clears_state_and_reports() {
        let h = harness(GenMode::Ok, true, false);
        let state = pending(&h, email()).await;

        let outcome = h.orchestrator.handle_answers(state, &parse_numbered_answers("2. 500")).await;

        assert!(matches!(outcome, ReplyOutcome::DraftFailed { .. }));
        assert!(h.store.get("chat-1").await.is_none());
        let sent = h.transport.sent.lock().unwrap();
        assert!(sent[0].1.contains("Thursday works for me."));
        assert!(sent[1].1.contains("could not be saved"));
    }

    #[tokio::test]
    async fn send_failure_does_not_block_drafting_or_clearing() {
        let h = harness(GenMode::Ok, false, true);
        let state = pending(&h, email()).await;

        let outcome = h.orchestrator.handle_answers(state, &parse_numbered_answers("1. yes")).await;

        assert!(matches!(outcome, ReplyOutcome::Drafted { .. }));
        assert!(h.store.get("chat-1").await.is_none());
    }

    #[tokio::test]
    async fn missing_email_fields_get_placeholders() {
        let h = harness(GenMode::Ok, false, false);
        let state = pending(&h, OriginatingEmail::default()).await;

        h.orchestrator.handle_answers(state, &AnswerSet::new()).await;

        let seen = h.generator.seen.lock().unwrap();
        assert_eq!(seen[0].0.subject, "[No Subject]");
        assert_eq!(seen[0].0.sender, "[Unknown Sender]");
        assert_eq!(seen[0].0.body, "");
        assert!(seen[0].1.is_empty());
    }
}
