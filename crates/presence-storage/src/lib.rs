use chrono::Utc;
use presence_core::{LatestCommitNotice, PresenceSnapshot, LATEST_COMMIT_KEY, PRESENCE_KEY};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

pub const KV_SCHEMA_VERSION: i64 = 1;

const KV_SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Minimal string key-value contract shared by the durable and fallback slots.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Durable backend: one SQLite table, last write wins.
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::Poisoned)
    }

    pub fn schema_version(&self) -> Result<i64, StorageError> {
        let conn = self.conn()?;
        Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
    }
}

fn migrate(conn: &Connection) -> Result<(), StorageError> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current > KV_SCHEMA_VERSION {
        return Err(StorageError::UnsupportedSchemaVersion {
            found: current,
            supported: KV_SCHEMA_VERSION,
        });
    }
    if current < 1 {
        conn.execute_batch(KV_SCHEMA_V1)?;
        conn.execute("PRAGMA user_version = 1", []).map(|_| ())?;
    }
    Ok(())
}

impl KvBackend for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn()?;
        Ok(conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = self.conn()?;
        conn.execute(
            "
            INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value=excluded.value,
                updated_at=excluded.updated_at
            ",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

/// Process-local slots. Nothing survives a restart or is shared between
/// instances.
#[derive(Default)]
pub struct MemoryKv {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let slots = self.slots.lock().map_err(|_| StorageError::Poisoned)?;
        Ok(slots.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut slots = self.slots.lock().map_err(|_| StorageError::Poisoned)?;
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// The presence and latest-commit slots over an optional durable backend
/// with an in-memory fallback. Durable failures are logged and absorbed.
pub struct StatusStore {
    durable: Option<Box<dyn KvBackend>>,
    memory: MemoryKv,
}

impl StatusStore {
    pub fn in_memory() -> Self {
        Self {
            durable: None,
            memory: MemoryKv::new(),
        }
    }

    pub fn with_backend(durable: Box<dyn KvBackend>) -> Self {
        Self {
            durable: Some(durable),
            memory: MemoryKv::new(),
        }
    }

    /// Opens the SQLite file at `path`. No path, or a file that cannot be
    /// opened, leaves the store in memory-only mode.
    pub fn open(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            warn!(event = "kv_unconfigured", "using in-memory status store");
            return Self::in_memory();
        };
        match SqliteKv::open(path) {
            Ok(kv) => {
                debug!(event = "kv_open", path = %path.display());
                Self::with_backend(Box::new(kv))
            }
            Err(err) => {
                warn!(event = "kv_unavailable", path = %path.display(), error = %err);
                Self::in_memory()
            }
        }
    }

    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }

    pub fn get_presence(&self) -> PresenceSnapshot {
        self.read_json(PRESENCE_KEY).unwrap_or_default()
    }

    pub fn put_presence(&self, snapshot: &PresenceSnapshot) -> Result<(), StorageError> {
        self.write_json(PRESENCE_KEY, snapshot)
    }

    pub fn latest_commit(&self) -> Option<LatestCommitNotice> {
        self.read_json(LATEST_COMMIT_KEY)
    }

    pub fn put_latest_commit(&self, notice: &LatestCommitNotice) -> Result<(), StorageError> {
        self.write_json(LATEST_COMMIT_KEY, notice)
    }

    /// Reads both copies and serves the newer one. A memory copy that is
    /// newer than the durable slot (written during an outage) is written back.
    fn read_json<T>(&self, key: &str) -> Option<T>
    where
        T: serde::de::DeserializeOwned + serde::Serialize + Revisioned,
    {
        let remembered = match self.memory.get(key) {
            Ok(raw) => raw.and_then(|raw| decode::<T>(&raw).ok()),
            Err(err) => {
                warn!(event = "memory_read_error", key = key, error = %err);
                None
            }
        };
        let Some(durable) = &self.durable else {
            return remembered;
        };
        let stored = match durable.get(key) {
            Ok(Some(raw)) => match decode::<T>(&raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(event = "kv_decode_error", key = key, error = %err);
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(event = "kv_unavailable", key = key, error = %err);
                return remembered;
            }
        };
        match (stored, remembered) {
            (Some(stored), Some(remembered)) if remembered.revision() > stored.revision() => {
                self.write_back(durable.as_ref(), key, &remembered);
                Some(remembered)
            }
            (Some(stored), _) => Some(stored),
            (None, Some(remembered)) => {
                self.write_back(durable.as_ref(), key, &remembered);
                Some(remembered)
            }
            (None, None) => None,
        }
    }

    fn write_back<T: serde::Serialize>(&self, durable: &dyn KvBackend, key: &str, value: &T) {
        let Ok(raw) = serde_json::to_string(value) else {
            return;
        };
        match durable.put(key, &raw) {
            Ok(()) => debug!(event = "kv_resync", key = key),
            Err(err) => warn!(event = "kv_unavailable", key = key, error = %err),
        }
    }

    /// Every write lands in memory; the durable slot is written too when
    /// it is reachable.
    fn write_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        if let Some(durable) = &self.durable {
            if let Err(err) = durable.put(key, &raw) {
                warn!(event = "kv_unavailable", key = key, error = %err);
            }
        }
        self.memory.put(key, &raw)
    }
}

/// Orders two copies of the same slot; the higher revision is newer.
pub trait Revisioned {
    fn revision(&self) -> i64;
}

impl Revisioned for PresenceSnapshot {
    fn revision(&self) -> i64 {
        self.last_update
    }
}

impl Revisioned for LatestCommitNotice {
    fn revision(&self) -> i64 {
        self.timestamp
    }
}

fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StorageError> {
    serde_json::from_str(raw).map_err(|err| StorageError::Serialization(err.to_string()))
}
