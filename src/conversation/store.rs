//! Conversation state store: in-memory, per-session, TTL-bounded.
//!
//! At most one pending question set exists per session; storing a new one
//! replaces the old. Expiry is lazy: an entry older than the TTL is removed
//! the next time it is read, never by a background sweep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::model::{ConversationState, ConversationSummary};

/// Default retention window for a pending conversation.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Time source for the store.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Session id → pending conversation.
pub struct ConversationStore {
    entries: RwLock<HashMap<String, ConversationState>>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl ConversationStore {
    /// Create a store on the wall clock with the default 24h TTL.
    pub fn new() -> Arc<Self> {
        Self::with_clock(Arc::new(SystemClock), DEFAULT_TTL)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, ttl: Duration) -> Arc<Self> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            ttl,
        })
    }

    /// Insert or overwrite the state for `session_id`, stamping `created_at`.
    ///
    /// Blank session ids are ignored.
    pub async fn store(&self, session_id: &str, mut state: ConversationState) {
        if session_id.is_empty() {
            debug!("Ignoring conversation store with empty session id");
            return;
        }

        state.session_id = session_id.to_string();
        state.created_at = self.clock.now();

        info!(
            session_id = %session_id,
            questions = state.questions.len(),
            subject = %state.email.subject,
            "Stored pending conversation"
        );

        let mut entries = self.entries.write().await;
        entries.insert(session_id.to_string(), state);
    }

    /// Fetch the state for `session_id`, dropping it if it has expired.
    pub async fn get(&self, session_id: &str) -> Option<ConversationState> {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;

        let state = entries.get(session_id)?;
        if now - state.created_at > self.ttl {
            info!(session_id = %session_id, "Pending conversation expired");
            entries.remove(session_id);
            return None;
        }

        Some(state.clone())
    }

    /// Remove the state for `session_id`, if any.
    pub async fn clear(&self, session_id: &str) {
        let mut entries = self.entries.write().await;
        if entries.remove(session_id).is_some() {
            debug!(session_id = %session_id, "Cleared pending conversation");
        }
    }

    /// Diagnostic listing; expired entries still show until they are read.
    pub async fn list(&self) -> Vec<ConversationSummary> {
        let now = self.clock.now();
        let entries = self.entries.read().await;
        let mut out: Vec<_> = entries
            .values()
            .map(|s| ConversationSummary {
                session_id: s.session_id.clone(),
                subject: s.email.subject.clone(),
                question_count: s.questions.len(),
                age_seconds: (now - s.created_at).num_seconds(),
            })
            .collect();
        out.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        out
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
