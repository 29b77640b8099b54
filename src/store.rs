//! Persistent slot configuration, counters, and error log
//!
//! Everything is keyed by SIM slot index on top of a flat key-value store.
//! The store backend is injected so tests can run against an in-memory map
//! while production uses SQLite.

use crate::error::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Global set key holding error log entries
pub const ERROR_LOGS_KEY: &str = "error_logs";

/// Tag used for error entries that cannot be attributed to a slot
pub const SYSTEM_TAG: &str = "system";

/// Flat key-value store with string-set support, the persistence boundary.
///
/// Each operation is individually atomic; writes are visible to concurrent
/// readers before the call returns.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Increment the integer value under `key` by one, returning the new value.
    /// Absent keys count from zero.
    fn increment(&self, key: &str) -> Result<u64>;
    /// Insert an entry into the string set under `key`. Duplicate entries
    /// collapse (set semantics).
    fn set_insert(&self, key: &str, entry: &str) -> Result<()>;
    fn set_members(&self, key: &str) -> Result<Vec<String>>;
    fn set_clear(&self, key: &str) -> Result<()>;
}

/// In-memory store for tests
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    sets: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn increment(&self, key: &str) -> Result<u64> {
        let mut values = self.values.lock().unwrap();
        let current: u64 = values
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let next = current + 1;
        values.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    fn set_insert(&self, key: &str, entry: &str) -> Result<()> {
        self.sets
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(entry.to_string());
        Ok(())
    }

    fn set_members(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn set_clear(&self, key: &str) -> Result<()> {
        self.sets.lock().unwrap().remove(key);
        Ok(())
    }
}

/// SQLite-backed store used by the daemon and CLI
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS log_sets (
                set_key TEXT NOT NULL,
                entry TEXT NOT NULL,
                PRIMARY KEY (set_key, entry)
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT CAST(value AS TEXT) FROM kv WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    fn increment(&self, key: &str) -> Result<u64> {
        // Lock held across both statements so the increment is atomic
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, '1')
             ON CONFLICT(key) DO UPDATE SET
                 value = CAST(CAST(value AS INTEGER) + 1 AS TEXT)",
            [key],
        )?;
        let value: i64 = conn.query_row(
            "SELECT CAST(value AS INTEGER) FROM kv WHERE key = ?1",
            [key],
            |row| row.get(0),
        )?;
        Ok(value.max(0) as u64)
    }

    fn set_insert(&self, key: &str, entry: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO log_sets (set_key, entry) VALUES (?1, ?2)",
            [key, entry],
        )?;
        Ok(())
    }

    fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT entry FROM log_sets WHERE set_key = ?1 ORDER BY entry")?;
        let members = stmt
            .query_map([key], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(members)
    }

    fn set_clear(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM log_sets WHERE set_key = ?1", [key])?;
        Ok(())
    }
}

/// Per-slot webhook configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotConfig {
    pub webhook_url: String,
    pub user_agent: String,
    pub name: String,
}

/// Per-slot delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
}

impl SlotStats {
    /// Counter invariant: every attempt is either a success or a failure
    pub fn is_consistent(&self) -> bool {
        self.total == self.successful + self.failed
    }
}

/// Slot-scoped accessor over the key-value store.
///
/// Reads never fail: absent keys yield empty strings or zero, and backend
/// read errors are logged and defaulted.
#[derive(Clone)]
pub struct SlotStore {
    kv: Arc<dyn KeyValueStore>,
}

fn key_webhook_url(slot: usize) -> String {
    format!("webhook_url_{slot}")
}

fn key_user_agent(slot: usize) -> String {
    format!("user_agent_{slot}")
}

fn key_slot_name(slot: usize) -> String {
    format!("sim_slot_name_{slot}")
}

fn key_total(slot: usize) -> String {
    format!("total_forwarded_{slot}")
}

fn key_successful(slot: usize) -> String {
    format!("successful_forwards_{slot}")
}

fn key_failed(slot: usize) -> String {
    format!("failed_forwards_{slot}")
}

impl SlotStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    fn get_or_default(&self, key: &str) -> String {
        match self.kv.get(key) {
            Ok(value) => value.unwrap_or_default(),
            Err(e) => {
                warn!(key, error = %e, "store read failed, using default");
                String::new()
            }
        }
    }

    fn counter(&self, key: &str) -> u64 {
        self.get_or_default(key).parse().unwrap_or(0)
    }

    pub fn webhook_url(&self, slot: usize) -> String {
        self.get_or_default(&key_webhook_url(slot))
    }

    pub fn set_webhook_url(&self, slot: usize, url: &str) -> Result<()> {
        self.kv.set(&key_webhook_url(slot), url)
    }

    pub fn user_agent(&self, slot: usize) -> String {
        self.get_or_default(&key_user_agent(slot))
    }

    pub fn set_user_agent(&self, slot: usize, user_agent: &str) -> Result<()> {
        self.kv.set(&key_user_agent(slot), user_agent)
    }

    /// Raw stored slot name (may be empty)
    pub fn slot_name(&self, slot: usize) -> String {
        self.get_or_default(&key_slot_name(slot))
    }

    pub fn set_slot_name(&self, slot: usize, name: &str) -> Result<()> {
        self.kv.set(&key_slot_name(slot), name)
    }

    /// Slot name with the generated "SIM N" default when unset
    pub fn display_name(&self, slot: usize) -> String {
        let name = self.slot_name(slot);
        if name.trim().is_empty() {
            format!("SIM {}", slot + 1)
        } else {
            name
        }
    }

    pub fn slot_config(&self, slot: usize) -> SlotConfig {
        SlotConfig {
            webhook_url: self.webhook_url(slot),
            user_agent: self.user_agent(slot),
            name: self.slot_name(slot),
        }
    }

    pub fn stats(&self, slot: usize) -> SlotStats {
        SlotStats {
            total: self.counter(&key_total(slot)),
            successful: self.counter(&key_successful(slot)),
            failed: self.counter(&key_failed(slot)),
        }
    }

    pub fn increment_total(&self, slot: usize) {
        if let Err(e) = self.kv.increment(&key_total(slot)) {
            warn!(slot, error = %e, "failed to increment total counter");
        }
    }

    pub fn increment_successful(&self, slot: usize) {
        if let Err(e) = self.kv.increment(&key_successful(slot)) {
            warn!(slot, error = %e, "failed to increment success counter");
        }
    }

    pub fn increment_failed(&self, slot: usize) {
        if let Err(e) = self.kv.increment(&key_failed(slot)) {
            warn!(slot, error = %e, "failed to increment failure counter");
        }
    }

    /// Append an error entry tagged with a slot's display name.
    ///
    /// Entries are timestamped at write time and formatted as
    /// `<epoch-ms>|[<tag>] <message>`. Byte-identical entries collapse.
    pub fn log_error(&self, tag: &str, message: &str) {
        let entry = format!("{}|[{}] {}", Utc::now().timestamp_millis(), tag, message);
        if let Err(e) = self.kv.set_insert(ERROR_LOGS_KEY, &entry) {
            warn!(error = %e, "failed to append error log entry");
        }
    }

    /// Append an error entry that cannot be attributed to any slot
    pub fn log_system_error(&self, message: &str) {
        self.log_error(SYSTEM_TAG, message);
    }

    pub fn error_logs(&self) -> Vec<String> {
        match self.kv.set_members(ERROR_LOGS_KEY) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to read error logs");
                Vec::new()
            }
        }
    }

    pub fn clear_error_logs(&self) -> Result<()> {
        self.kv.set_clear(ERROR_LOGS_KEY)
    }
}
