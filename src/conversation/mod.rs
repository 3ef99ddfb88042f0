//! Conversation correlation: parsing replies and holding pending question sets.

pub mod model;
pub mod parser;
pub mod store;

pub use model::{ConversationState, ConversationSummary, OriginatingEmail};
pub use parser::{
    AnswerSet, CorrelatedAnswers, format_numbered_questions, match_answers_to_questions,
    parse_numbered_answers,
};
pub use store::{Clock, ConversationStore, ManualClock, SystemClock};
