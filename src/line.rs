//! Line resolution - map a line identifier to its SIM slot and phone number
//!
//! Lookups are gated by platform capabilities: denied permissions yield
//! absence, never an error.

use crate::config::{Config, TEST_LINE_ID};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Outcome of resolving a line identifier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedLine {
    /// Physical SIM slot index, absent when the line is unknown or the
    /// lookup permission is denied
    pub slot: Option<usize>,
    /// The line's own phone number, absent without the phone-number
    /// permission even when the slot is known
    pub number: Option<String>,
}

/// Platform permission predicate consulted before each privileged lookup
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub line_info: bool,
    pub phone_numbers: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            line_info: true,
            phone_numbers: true,
        }
    }
}

impl Capabilities {
    pub fn from_config(config: &Config) -> Self {
        Self {
            line_info: config.read_line_info,
            phone_numbers: config.read_phone_numbers,
        }
    }
}

/// External registry of active lines
pub trait LineRegistry: Send + Sync {
    fn slot_index(&self, line_id: i64) -> Option<usize>;
    fn phone_number(&self, line_id: i64) -> Option<String>;
}

/// Resolves line identifiers against the registry, honoring capabilities
pub struct LineResolver {
    registry: Arc<dyn LineRegistry>,
    caps: Capabilities,
}

impl LineResolver {
    pub fn new(registry: Arc<dyn LineRegistry>, caps: Capabilities) -> Self {
        Self { registry, caps }
    }

    /// Resolve a line identifier. The sentinel returns the unresolved line;
    /// permission denial or an unknown identifier yields absent fields.
    pub fn resolve(&self, line_id: i64) -> ResolvedLine {
        if line_id == TEST_LINE_ID {
            return ResolvedLine::default();
        }

        let slot = if self.caps.line_info {
            self.registry.slot_index(line_id)
        } else {
            None
        };

        let number = match slot {
            Some(_) if self.caps.phone_numbers => self.registry.phone_number(line_id),
            _ => None,
        };

        ResolvedLine { slot, number }
    }
}

/// A registered line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineInfo {
    pub slot: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
}

/// Persistent JSON registry mapping line identifiers to slot and number
pub struct FileLineRegistry {
    registry_path: PathBuf,
    data: HashMap<i64, LineInfo>,
}

impl FileLineRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            registry_path: config.lines_file.clone(),
            data: HashMap::new(),
        }
    }

    /// Load registry from disk
    pub fn load(&mut self) -> Result<usize> {
        if !self.registry_path.exists() {
            self.data = HashMap::new();
            return Ok(0);
        }

        let content = fs::read_to_string(&self.registry_path)?;
        self.data = serde_json::from_str(&content)?;
        Ok(self.data.len())
    }

    /// Save registry to disk atomically
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.registry_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to temp file in same directory (for atomic rename)
        let parent = self
            .registry_path
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let mut temp = NamedTempFile::new_in(parent)?;

        let json = serde_json::to_string_pretty(&self.data)?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;

        temp.persist(&self.registry_path)
            .map_err(|e| Error::Io(e.error))?;

        Ok(())
    }

    /// Register or update a line
    pub fn register(&mut self, line_id: i64, slot: usize, number: Option<String>) -> Result<()> {
        self.data.insert(line_id, LineInfo { slot, number });
        self.save()
    }

    /// Remove a line from the registry
    pub fn remove(&mut self, line_id: i64) -> Result<Option<LineInfo>> {
        let removed = self.data.remove(&line_id);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn get(&self, line_id: i64) -> Option<&LineInfo> {
        self.data.get(&line_id)
    }

    pub fn all(&self) -> &HashMap<i64, LineInfo> {
        &self.data
    }

    /// Distinct slot indices, sorted
    pub fn slots(&self) -> Vec<usize> {
        let mut slots: Vec<usize> = self.data.values().map(|l| l.slot).collect();
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl LineRegistry for FileLineRegistry {
    fn slot_index(&self, line_id: i64) -> Option<usize> {
        self.data.get(&line_id).map(|l| l.slot)
    }

    fn phone_number(&self, line_id: i64) -> Option<String> {
        self.data.get(&line_id).and_then(|l| l.number.clone())
    }
}
