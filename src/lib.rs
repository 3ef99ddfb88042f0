//! Reply Relay: email questions over chat, answers back into drafted replies.

pub mod api;
pub mod channels;
pub mod config;
pub mod conversation;
pub mod error;
pub mod ingest;
pub mod reply;
pub mod router;
