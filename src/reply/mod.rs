//! Reply generation, draft persistence and the orchestration tying them together.

pub mod drafts;
pub mod generator;
pub mod orchestrator;

pub use drafts::{DisabledDraftStore, DraftStore, ImapDraftStore};
pub use generator::{GeneratedReply, LlmReplyGenerator, ReplyGenerator};
pub use orchestrator::{ReplyOrchestrator, ReplyOutcome};
