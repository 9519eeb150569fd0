use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use clap::ValueEnum;
use presence_core::{
    accumulate, parse_heartbeat, AccumulatorOptions, Clock, LatestCommitNotice,
    PartialPresenceSnapshot, PresenceError, PresenceSnapshot,
};
use presence_storage::StatusStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

pub const PRESENCE_PATH: &str = "/api/unity-status";
pub const LATEST_COMMIT_PATH: &str = "/api/latest-commit";
pub const GITHUB_WEBHOOK_PATH: &str = "/api/github-webhook";
const GITHUB_EVENT_HEADER: &str = "x-github-event";

/// How concurrent heartbeat writes are coordinated inside one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum WriteMode {
    /// Read, accumulate and write without coordination. Two writers that
    /// read the same snapshot race and the later write wins.
    #[default]
    LastWriteWins,
    /// Read-accumulate-write runs under one async mutex and the receive
    /// time is taken inside it.
    Serialized,
}

pub struct HubState {
    store: Arc<StatusStore>,
    clock: Arc<dyn Clock>,
    auth_token: Option<String>,
    write_mode: WriteMode,
    options: AccumulatorOptions,
    service_name: String,
    write_lock: AsyncMutex<()>,
}

impl HubState {
    pub fn new(
        store: Arc<StatusStore>,
        clock: Arc<dyn Clock>,
        auth_token: Option<String>,
        write_mode: WriteMode,
        options: AccumulatorOptions,
        service_name: String,
    ) -> Self {
        Self {
            store,
            clock,
            auth_token: auth_token.filter(|token| !token.is_empty()),
            write_mode,
            options,
            service_name,
            write_lock: AsyncMutex::new(()),
        }
    }

    pub fn requires_auth(&self) -> bool {
        self.auth_token.is_some()
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), PresenceError> {
        let Some(expected) = self.auth_token.as_deref() else {
            return Ok(());
        };
        let raw = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let token = raw.trim_start().strip_prefix("Bearer ").unwrap_or(raw).trim();
        if token == expected {
            Ok(())
        } else {
            Err(PresenceError::Unauthorized)
        }
    }

    /// Runs a store call on the blocking pool so SQLite I/O stays off the
    /// runtime workers.
    async fn with_store<T, F>(&self, op: F) -> Result<T, PresenceError>
    where
        F: FnOnce(&StatusStore) -> T + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|err| PresenceError::Unavailable(format!("store task failed: {err}")))
    }

    pub async fn current(&self) -> Result<PresenceSnapshot, PresenceError> {
        self.with_store(|store| store.get_presence()).await
    }

    /// Accumulates `incoming` onto `previous` at server time `now`.
    pub fn compute(
        &self,
        previous: &PresenceSnapshot,
        incoming: &PartialPresenceSnapshot,
        now: i64,
    ) -> PresenceSnapshot {
        accumulate(previous, incoming, now, self.options)
    }

    /// Persists `next`; a durable failure has already degraded to memory,
    /// so only a broken fallback slot is reported.
    pub async fn persist(&self, next: &PresenceSnapshot) -> Result<(), PresenceError> {
        let next = next.clone();
        self.with_store(move |store| store.put_presence(&next))
            .await?
            .map_err(|err| {
                warn!(event = "presence_persist_error", error = %err);
                PresenceError::Unavailable(err.to_string())
            })
    }

    pub async fn apply_heartbeat(
        &self,
        incoming: &PartialPresenceSnapshot,
    ) -> Result<PresenceSnapshot, PresenceError> {
        let _guard = match self.write_mode {
            WriteMode::Serialized => Some(self.write_lock.lock().await),
            WriteMode::LastWriteWins => None,
        };
        let now = self.clock.now_ms();
        let previous = self.current().await?;
        let next = self.compute(&previous, incoming, now);
        self.persist(&next).await?;
        info!(
            event = "presence_write",
            mode = %next.mode,
            previous_mode = %previous.mode,
            total_ms = next.total_ms,
            session_ms = next.session_ms,
            last_update = next.last_update
        );
        Ok(next)
    }

    pub async fn latest_commit(&self) -> Result<LatestCommitNotice, PresenceError> {
        let stored = self.with_store(|store| store.latest_commit()).await?;
        Ok(stored.unwrap_or_else(|| LatestCommitNotice::placeholder(self.clock.now_ms())))
    }

    async fn record_push(&self, event: &str, payload: &Value) -> Result<(), PresenceError> {
        let Some(notice) =
            LatestCommitNotice::from_push_event(event, payload, self.clock.now_ms())
        else {
            debug!(event = "webhook_ignored", github_event = event);
            return Ok(());
        };
        let stored = notice.clone();
        self.with_store(move |store| store.put_latest_commit(&stored))
            .await?
            .map_err(|err| {
                warn!(event = "commit_persist_error", error = %err);
                PresenceError::Unavailable(err.to_string())
            })?;
        info!(event = "commit_recorded", sha = %notice.sha, author = %notice.author);
        Ok(())
    }
}

pub fn router(hub: Arc<HubState>) -> Router {
    Router::new()
        .route(PRESENCE_PATH, get(get_presence).post(post_presence))
        .route(LATEST_COMMIT_PATH, get(get_latest_commit))
        .route(GITHUB_WEBHOOK_PATH, axum::routing::post(post_github_webhook))
        .route("/api/health", get(|| async { Json(json!({ "ok": true })) }))
        .route("/api/", get(get_identity))
        .with_state(hub)
}

fn error_response(err: &PresenceError) -> Response {
    let (status, message) = match err {
        PresenceError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "Invalid JSON"),
        PresenceError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
        PresenceError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "Unavailable"),
    };
    (status, Json(json!({ "error": message }))).into_response()
}

fn ok_response() -> Response {
    Json(json!({ "ok": true })).into_response()
}

pub async fn get_presence(State(hub): State<Arc<HubState>>) -> Response {
    match hub.current().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => error_response(&err),
    }
}

pub async fn post_presence(
    State(hub): State<Arc<HubState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(err) = hub.authorize(&headers) {
        warn!(event = "presence_unauthorized");
        return error_response(&err);
    }
    let incoming = match parse_heartbeat(&body) {
        Ok(value) => value,
        Err(err) => {
            warn!(event = "presence_invalid", error = %err, bytes = body.len());
            return error_response(&err);
        }
    };
    match hub.apply_heartbeat(&incoming).await {
        Ok(_) => ok_response(),
        Err(err) => error_response(&err),
    }
}

pub async fn get_latest_commit(State(hub): State<Arc<HubState>>) -> Response {
    match hub.latest_commit().await {
        Ok(notice) => Json(notice).into_response(),
        Err(err) => error_response(&err),
    }
}

pub async fn post_github_webhook(
    State(hub): State<Arc<HubState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let event = headers
        .get(GITHUB_EVENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(err) => {
            warn!(event = "webhook_invalid", error = %err);
            return error_response(&PresenceError::InvalidInput(err.to_string()));
        }
    };
    match hub.record_push(event, &payload).await {
        Ok(()) => ok_response(),
        Err(err) => error_response(&err),
    }
}

async fn get_identity(State(hub): State<Arc<HubState>>) -> Json<Value> {
    Json(json!({ "name": hub.service_name }))
}
