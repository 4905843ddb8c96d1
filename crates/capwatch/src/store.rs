//! History store: the last known capacity result per event.
//!
//! The reconciler reaches persisted state only through [`HistoryStore`].
//! Both operations are atomic per key. Every backend failure surfaces as
//! [`WatchError::PersistenceUnavailable`].

use crate::types::{CapacityResult, WatchError, WatchResult};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

/// Key-value access to persisted capacity state.
pub trait HistoryStore: Send + Sync {
    /// Last persisted result for the event, if any.
    fn get_prior(&self, event_id: &str) -> WatchResult<Option<CapacityResult>>;

    /// Replace the persisted result for the event.
    fn put(&self, event_id: &str, result: &CapacityResult) -> WatchResult<()>;
}

impl<S: HistoryStore + ?Sized> HistoryStore for Arc<S> {
    fn get_prior(&self, event_id: &str) -> WatchResult<Option<CapacityResult>> {
        (**self).get_prior(event_id)
    }

    fn put(&self, event_id: &str, result: &CapacityResult) -> WatchResult<()> {
        (**self).put(event_id, result)
    }
}

/// In-memory store for tests and dry runs. State is lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, CapacityResult>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> WatchError {
    WatchError::PersistenceUnavailable("store lock poisoned".to_string())
}

impl HistoryStore for MemoryStore {
    fn get_prior(&self, event_id: &str) -> WatchResult<Option<CapacityResult>> {
        Ok(self.entries.read().map_err(poisoned)?.get(event_id).cloned())
    }

    fn put(&self, event_id: &str, result: &CapacityResult) -> WatchResult<()> {
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(event_id.to_string(), result.clone());
        Ok(())
    }
}

/// SQLite-backed store, one row per event.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at `path`.
    pub fn open(path: &Path) -> WatchResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                WatchError::PersistenceUnavailable(format!(
                    "creating store dir {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let db = Connection::open(path).map_err(|e| {
            WatchError::PersistenceUnavailable(format!("opening store {}: {e}", path.display()))
        })?;
        Self::init(db)
    }

    /// A store that lives only as long as this value.
    pub fn open_in_memory() -> WatchResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(db: Connection) -> WatchResult<Self> {
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS capacity_state (
                event_id TEXT PRIMARY KEY,
                result_json TEXT NOT NULL,
                extracted_at TEXT NOT NULL
            );",
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Every persisted event id, sorted.
    pub fn event_ids(&self) -> WatchResult<Vec<String>> {
        let db = self.db.lock().map_err(poisoned)?;
        let mut stmt = db.prepare("SELECT event_id FROM capacity_state ORDER BY event_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}

impl HistoryStore for SqliteStore {
    fn get_prior(&self, event_id: &str) -> WatchResult<Option<CapacityResult>> {
        let db = self.db.lock().map_err(poisoned)?;
        let json: Option<String> = db
            .query_row(
                "SELECT result_json FROM capacity_state WHERE event_id = ?1",
                rusqlite::params![event_id],
                |row| row.get(0),
            )
            .optional()?;

        json.map(|j| {
            serde_json::from_str(&j).map_err(|e| {
                WatchError::PersistenceUnavailable(format!("corrupt state for {event_id}: {e}"))
            })
        })
        .transpose()
    }

    fn put(&self, event_id: &str, result: &CapacityResult) -> WatchResult<()> {
        let json = serde_json::to_string(result)?;
        let db = self.db.lock().map_err(poisoned)?;
        db.execute(
            "INSERT OR REPLACE INTO capacity_state (event_id, result_json, extracted_at)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![event_id, json, result.extracted_at.to_rfc3339()],
        )?;
        Ok(())
    }
}
