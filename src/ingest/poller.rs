//! Update ingestion loop: long-polls the chat provider and dispatches updates.
//!
//! States: `Stopped` → (start) → `Polling` ⇄ `Backoff` → `Stopped`.
//!
//! [`UpdatePoller::poll_once`] performs one fetch/dispatch cycle and returns
//! the delay before the next one, so the state machine can be stepped in
//! tests without sleeping. [`UpdatePoller::run`] drives it with
//! `tokio::time::sleep`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backoff::{BackoffDecision, ConflictBackoff};
use crate::channels::{ChatTransport, FetchError, InboundUpdate};
use crate::config::PollerConfig;
use crate::error;

/// Consumer of ingested updates.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn handle(&self, update: InboundUpdate) -> error::Result<()>;
}

/// Poller lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Stopped,
    Polling,
    Backoff,
}

impl std::fmt::Display for PollerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Polling => "polling",
            Self::Backoff => "backoff",
        };
        write!(f, "{s}")
    }
}

/// Single active poller for one chat transport.
pub struct UpdatePoller {
    transport: Arc<dyn ChatTransport>,
    handler: Arc<dyn UpdateHandler>,
    config: PollerConfig,
    state: PollerState,
    /// High-water mark; the next fetch asks for `last_update_id + 1`.
    last_update_id: Option<i64>,
    backoff: ConflictBackoff,
    /// Set once the conflict path has stood the poller down.
    stood_down: bool,
}

impl UpdatePoller {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        handler: Arc<dyn UpdateHandler>,
        config: PollerConfig,
    ) -> Self {
        let backoff = ConflictBackoff::new(&config);
        Self {
            transport,
            handler,
            config,
            state: PollerState::Stopped,
            last_update_id: None,
            backoff,
            stood_down: false,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn last_update_id(&self) -> Option<i64> {
        self.last_update_id
    }

    pub fn conflicts(&self) -> u32 {
        self.backoff.conflicts()
    }

    /// Clear any webhook (best effort) and enter `Polling`.
    ///
    /// A poller that stood down after repeated conflicts stays stopped.
    pub async fn start(&mut self) {
        if self.stood_down {
            warn!("Poller stood down after repeated conflicts; not restarting");
            return;
        }

        if let Err(e) = self.transport.delete_webhook().await {
            warn!(
                channel = self.transport.name(),
                error = %e,
                "Failed to clear webhook; polling anyway"
            );
        }

        info!(channel = self.transport.name(), "Update poller started");
        self.transition(PollerState::Polling);
    }

    /// Run one fetch/dispatch cycle.
    ///
    /// Returns the delay before the next cycle, or `None` once stopped.
    pub async fn poll_once(&mut self) -> Option<Duration> {
        if self.state == PollerState::Stopped {
            return None;
        }

        let offset = self.last_update_id.map_or(0, |id| id + 1);
        let timeout_secs = self.long_poll_timeout();

        match self.transport.get_updates(offset, timeout_secs).await {
            Ok(updates) => {
                if self.state == PollerState::Backoff {
                    info!(
                        conflicts = self.backoff.conflicts(),
                        "Poll succeeded after conflicts; resuming normal polling"
                    );
                }
                self.backoff.reset();
                self.transition(PollerState::Polling);
                self.dispatch(updates).await;
                Some(self.config.poll_interval)
            }
            Err(FetchError::Conflict(reason)) => match self.backoff.on_conflict() {
                BackoffDecision::Retry(delay) => {
                    warn!(
                        attempt = self.backoff.conflicts(),
                        max = self.config.max_conflicts,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Another poller is active; backing off"
                    );
                    self.transition(PollerState::Backoff);
                    Some(delay)
                }
                BackoffDecision::GiveUp => {
                    error!(
                        conflicts = self.backoff.conflicts(),
                        "Too many consecutive poll conflicts; standing down"
                    );
                    self.transition(PollerState::Stopped);
                    self.stood_down = true;
                    None
                }
            },
            Err(FetchError::Transient(reason)) => {
                warn!(reason = %reason, "Update poll failed; retrying at normal interval");
                self.transition(PollerState::Polling);
                Some(self.config.poll_interval)
            }
        }
    }

    /// Advance the cursor past the batch, then hand each update to the
    /// handler in ascending id order, one at a time.
    async fn dispatch(&mut self, mut updates: Vec<InboundUpdate>) {
        if updates.is_empty() {
            return;
        }

        updates.sort_by_key(|u| u.update_id);
        if let Some(max_id) = updates.last().map(|u| u.update_id) {
            self.last_update_id = Some(self.last_update_id.map_or(max_id, |id| id.max(max_id)));
        }

        debug!(
            count = updates.len(),
            last_update_id = ?self.last_update_id,
            "Dispatching updates"
        );

        for update in updates {
            let update_id = update.update_id;
            let handled = AssertUnwindSafe(self.handler.handle(update))
                .catch_unwind()
                .await;

            match handled {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(update_id, error = %e, "Failed to handle update"),
                Err(_) => error!(update_id, "Update handler panicked"),
            }
        }
    }

    fn transition(&mut self, next: PollerState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, "Poller state changed");
            self.state = next;
        }
    }

    fn long_poll_timeout(&self) -> u64 {
        let (lo, hi) = (self.config.long_poll_min_secs, self.config.long_poll_max_secs);
        if lo >= hi {
            lo
        } else {
            rand::thread_rng().gen_range(lo..=hi)
        }
    }

    /// Poll until stood down.
    pub async fn run(mut self) {
        self.start().await;
        while let Some(delay) = self.poll_once().await {
            tokio::time::sleep(delay).await;
        }
        info!(channel = self.transport.name(), "Update poller stopped");
    }
}

/// Spawn the poller as a background task.
pub fn spawn_poller(poller: UpdatePoller) -> JoinHandle<()> {
    tokio::spawn(poller.run())
}
