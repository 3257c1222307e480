//! Sidecar ledger of table dimensions and schema versions.
//!
//! The ledger is a JSON object stored next to the vector database, mapping
//! each table name to the embedding dimension and schema version it was
//! created with:
//!
//! ```json
//! {
//!   "persistent_memory": { "dimension": 384, "schemaVersion": 1 },
//!   "session_abc": 384
//! }
//! ```
//!
//! The second form (a bare integer) is the legacy dimension-only format. It is
//! upgraded to `{ dimension, schemaVersion: 1 }` on load and the file is
//! rewritten immediately.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Schema version assigned to legacy entries on upgrade.
const LEGACY_SCHEMA_VERSION: u32 = 1;

/// Dimension and schema version recorded for one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub dimension: usize,
    pub schema_version: u32,
}

impl LedgerEntry {
    pub fn new(dimension: usize, schema_version: u32) -> Self {
        Self {
            dimension,
            schema_version,
        }
    }
}

/// On-disk shape of a single ledger value.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Current(LedgerEntry),
    Legacy(serde_json::Value),
}

/// In-memory view of the ledger file.
#[derive(Debug, Clone)]
pub struct TableLedger {
    path: PathBuf,
    entries: BTreeMap<String, LedgerEntry>,
}

impl TableLedger {
    /// An empty ledger that will persist to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Load the ledger from disk.
    ///
    /// A missing file yields an empty ledger. A file that can't be parsed is
    /// logged and also yields an empty ledger. Legacy entries are upgraded and
    /// the file is re-saved before returning.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut ledger = Self::empty(&path);

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No table ledger at {:?}, starting empty", path);
                return Ok(ledger);
            }
            Err(e) => {
                tracing::warn!("Failed to read table ledger {:?}: {}", path, e);
                return Ok(ledger);
            }
        };

        let raw: BTreeMap<String, StoredEntry> = match serde_json::from_str(&content) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    "Table ledger {:?} is corrupt ({}), starting with an empty ledger",
                    path,
                    e
                );
                return Ok(ledger);
            }
        };

        let mut upgraded = 0usize;
        for (table, stored) in raw {
            match stored {
                StoredEntry::Current(entry) => {
                    ledger.entries.insert(table, entry);
                }
                StoredEntry::Legacy(value) => match value.as_u64() {
                    Some(dimension) if dimension > 0 => {
                        ledger.entries.insert(
                            table,
                            LedgerEntry::new(dimension as usize, LEGACY_SCHEMA_VERSION),
                        );
                        upgraded += 1;
                    }
                    _ => {
                        tracing::warn!(
                            table = %table,
                            "Skipping invalid ledger entry: {}",
                            value
                        );
                    }
                },
            }
        }

        if upgraded > 0 {
            tracing::info!(
                "Upgraded {} legacy ledger entries to schema version {}",
                upgraded,
                LEGACY_SCHEMA_VERSION
            );
            ledger.save()?;
        }

        Ok(ledger)
    }

    /// Persist the ledger with an atomic temp-file + rename.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create ledger directory {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(&self.entries).context("Failed to serialize ledger")?;
        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context("Failed to write ledger temp file")?;
        std::fs::rename(&temp_path, &self.path).context("Failed to replace ledger file")?;

        tracing::debug!("Saved table ledger ({} entries)", self.entries.len());
        Ok(())
    }

    pub fn get(&self, table: &str) -> Option<LedgerEntry> {
        self.entries.get(table).copied()
    }

    /// Insert or replace an entry, returning the previous one.
    pub fn set(&mut self, table: impl Into<String>, entry: LedgerEntry) -> Option<LedgerEntry> {
        self.entries.insert(table.into(), entry)
    }

    pub fn remove(&mut self, table: &str) -> Option<LedgerEntry> {
        self.entries.remove(table)
    }

    /// Set an entry and persist. The in-memory change is rolled back if the
    /// save fails.
    pub fn record(&mut self, table: &str, entry: LedgerEntry) -> Result<()> {
        let previous = self.set(table, entry);
        if let Err(e) = self.save() {
            match previous {
                Some(prev) => self.entries.insert(table.to_string(), prev),
                None => self.entries.remove(table),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Remove an entry and persist. Rolled back if the save fails.
    pub fn forget(&mut self, table: &str) -> Result<()> {
        let Some(previous) = self.remove(table) else {
            return Ok(());
        };
        if let Err(e) = self.save() {
            self.entries.insert(table.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    pub fn entries(&self) -> &BTreeMap<String, LedgerEntry> {
        &self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
