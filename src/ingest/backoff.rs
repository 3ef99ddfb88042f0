//! Conflict backoff schedule for the update poller.
//!
//! Schedule: 5 s → 7.5 s → 11.25 s → … → 60 s (cap), each plus up to 1 s
//! of random jitter. After `max_conflicts` consecutive conflicts the
//! poller stands down.

use std::time::Duration;

use rand::Rng;

use crate::config::PollerConfig;

const GROWTH_FACTOR: f64 = 1.5;

/// What to do after a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffDecision {
    /// Wait this long, then retry.
    Retry(Duration),
    /// Too many consecutive conflicts; stop polling for good.
    GiveUp,
}

/// Exponential backoff state for consecutive poll conflicts.
#[derive(Debug, Clone)]
pub struct ConflictBackoff {
    base: Duration,
    max: Duration,
    max_jitter: Duration,
    max_conflicts: u32,
    /// Un-jittered delay used for the previous retry.
    previous: Option<Duration>,
    conflicts: u32,
}

impl ConflictBackoff {
    pub fn new(config: &PollerConfig) -> Self {
        Self {
            base: config.conflict_base,
            max: config.conflict_max,
            max_jitter: config.max_jitter,
            max_conflicts: config.max_conflicts,
            previous: None,
            conflicts: 0,
        }
    }

    /// Consecutive conflicts seen since the last successful poll.
    pub fn conflicts(&self) -> u32 {
        self.conflicts
    }

    /// Forget all conflicts (a poll succeeded).
    pub fn reset(&mut self) {
        self.previous = None;
        self.conflicts = 0;
    }

    /// Record a conflict, using random jitter.
    pub fn on_conflict(&mut self) -> BackoffDecision {
        let max_ms = self.max_jitter.as_millis() as u64;
        let jitter = if max_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
        };
        self.on_conflict_with_jitter(jitter)
    }

    /// Record a conflict with an explicit jitter (clamped to the configured maximum).
    pub fn on_conflict_with_jitter(&mut self, jitter: Duration) -> BackoffDecision {
        self.conflicts += 1;
        if self.conflicts > self.max_conflicts {
            return BackoffDecision::GiveUp;
        }

        let delay = match self.previous {
            None => self.base.min(self.max),
            Some(prev) => prev.mul_f64(GROWTH_FACTOR).min(self.max),
        };
        self.previous = Some(delay);

        BackoffDecision::Retry(delay + jitter.min(self.max_jitter))
    }
}
