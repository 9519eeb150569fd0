pub mod accumulator;
pub mod commit;
pub mod format;
pub mod presence;

use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

pub use accumulator::{accumulate, merge_defaults, parse_heartbeat, tenure_ms, AccumulatorOptions};
pub use commit::LatestCommitNotice;
pub use presence::{
    EditorInfo, PartialPresenceSnapshot, PresenceMode, PresenceSnapshot, ProjectInfo,
};

/// Store key of the single presence slot.
pub const PRESENCE_KEY: &str = "unity_status";
/// Store key of the single latest-commit slot.
pub const LATEST_COMMIT_KEY: &str = "latest_commit";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PresenceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Source of wall-clock milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
