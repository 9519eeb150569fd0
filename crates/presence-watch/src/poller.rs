use crate::source::{StatusSource, WatchError};
use presence_core::{Clock, PresenceSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_ENDPOINT: &str = "/api/unity-status";
pub const DEFAULT_POLL_MS: u64 = 10_000;
pub const MIN_POLL_MS: u64 = 2_000;
pub const FALLBACK_ERROR: &str = "API unavailable (dev fallback)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    pub endpoint: String,
    pub poll_interval: Duration,
}

impl PollerConfig {
    /// Intervals below the floor are raised to it.
    pub fn new(endpoint: impl Into<String>, poll_ms: u64) -> Self {
        Self {
            endpoint: endpoint.into(),
            poll_interval: Duration::from_millis(poll_ms.max(MIN_POLL_MS)),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, DEFAULT_POLL_MS)
    }
}

/// Joins a relative endpoint path onto `base_url`; absolute URLs pass through.
pub fn resolve_endpoint(base_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if endpoint.starts_with('/') {
        format!("{base}{endpoint}")
    } else {
        format!("{base}/{endpoint}")
    }
}

/// Result of one fetch as the display sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollUpdate {
    pub snapshot: PresenceSnapshot,
    /// Set when the snapshot is the local offline fallback.
    pub error: Option<String>,
    pub fetched_at_ms: i64,
}

impl PollUpdate {
    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

/// One fetch bounded by `timeout`. Any failure, including a fetch that never
/// completes, yields the offline fallback.
pub async fn poll_once<S: StatusSource + ?Sized>(
    source: &S,
    clock: &dyn Clock,
    timeout: Duration,
) -> PollUpdate {
    let fetched = match tokio::time::timeout(timeout, source.fetch()).await {
        Ok(result) => result,
        Err(_) => Err(WatchError::Network(format!(
            "no response within {} ms",
            timeout.as_millis()
        ))),
    };
    match fetched {
        Ok(snapshot) => PollUpdate {
            snapshot,
            error: None,
            fetched_at_ms: clock.now_ms(),
        },
        Err(err) => {
            let now = clock.now_ms();
            warn!(event = "poll_failed", error = %err);
            PollUpdate {
                snapshot: PresenceSnapshot::offline_at(now),
                error: Some(FALLBACK_ERROR.to_string()),
                fetched_at_ms: now,
            }
        }
    }
}

/// Owns a running poll loop. Disposing, or dropping, the handle tears the
/// timer down.
pub struct PollerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    updates: watch::Receiver<Option<PollUpdate>>,
}

impl PollerHandle {
    pub fn subscribe(&self) -> watch::Receiver<Option<PollUpdate>> {
        self.updates.clone()
    }

    pub fn latest(&self) -> Option<PollUpdate> {
        self.updates.borrow().clone()
    }

    pub async fn dispose(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!(event = "poller_disposed");
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct PresencePoller;

impl PresencePoller {
    /// Fetches immediately, then once per interval until the handle is
    /// disposed. Failures are retried at the same cadence.
    pub fn spawn<S>(source: S, config: PollerConfig, clock: Arc<dyn Clock>) -> PollerHandle
    where
        S: StatusSource + 'static,
    {
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            run_poll_loop(source, config, clock, tx, task_cancel).await;
        });
        PollerHandle {
            cancel,
            task: Some(task),
            updates: rx,
        }
    }
}

async fn run_poll_loop<S: StatusSource>(
    source: S,
    config: PollerConfig,
    clock: Arc<dyn Clock>,
    tx: watch::Sender<Option<PollUpdate>>,
    cancel: CancellationToken,
) {
    info!(
        event = "poller_start",
        endpoint = %config.endpoint,
        interval_ms = config.poll_interval.as_millis() as u64
    );
    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let update = tokio::select! {
            _ = cancel.cancelled() => break,
            update = poll_once(&source, clock.as_ref(), config.poll_interval) => update,
        };
        tx.send_replace(Some(update));
    }
    debug!(event = "poller_stop");
}
