//! Persistence layer.
//!
//! The ledger treats storage as an injected load/save capability over three
//! named collections. Each collection is a flat JSON mapping from record id
//! to record. [`JsonFileStorage`] keeps all of them in one pretty-printed
//! document; [`MemoryStorage`] keeps everything in process memory.

use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::{debug, info};

/// A record mapping as stored on disk: id → record.
pub type Mapping = serde_json::Map<String, serde_json::Value>;

/// The collections the ledger persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Positions,
    Sources,
}

impl Collection {
    pub const ALL: &'static [Collection] =
        &[Collection::Users, Collection::Positions, Collection::Sources];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Positions => "positions",
            Collection::Sources => "sources",
        }
    }
}

/// Storage collaborator consumed by the ledger.
///
/// Both operations are durable on return. `save_batch` writes several
/// collections as one logical unit; implementations that can make that
/// atomic should override the default.
#[cfg_attr(test, mockall::automock)]
pub trait LedgerStorage: Send + Sync {
    /// Load a collection. `None` means it has never been saved.
    fn load(&self, collection: Collection) -> Result<Option<Mapping>>;

    /// Replace a collection.
    fn save(&self, collection: Collection, data: &Mapping) -> Result<()>;

    /// Replace several collections together.
    fn save_batch(&self, batch: &[(Collection, Mapping)]) -> Result<()> {
        for (collection, data) in batch {
            self.save(*collection, data)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// All collections in one JSON document under a data directory.
///
/// The document maps collection name to collection. Every save rewrites the
/// whole document to a staging file and renames it into place, so a reader
/// after a crash or failed write sees either the old document or the new
/// one, never a mix of collections from both.
pub struct JsonFileStorage {
    dir: PathBuf,
}

impl JsonFileStorage {
    /// Open (and create if needed) the data directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// The ledger document.
    pub fn path(&self) -> PathBuf {
        self.dir.join("ledger.json")
    }

    /// Where the next document is written before being renamed into place.
    pub fn staging_path(&self) -> PathBuf {
        self.dir.join("ledger.json.tmp")
    }

    fn read_document(&self) -> Result<Option<Mapping>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let document: Mapping = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Some(document))
    }

    fn write_document(&self, document: &Mapping) -> Result<()> {
        let json = serde_json::to_string_pretty(document).context("Failed to serialise ledger")?;
        let tmp = self.staging_path();
        if let Err(e) = std::fs::write(&tmp, json) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("Failed to write {}", tmp.display()));
        }
        let path = self.path();
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move {} into place", path.display()))
    }

    /// Delete the ledger document (for testing or reset).
    pub fn clear(&self) -> Result<()> {
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete {}", path.display()))?;
        }
        Ok(())
    }
}

impl LedgerStorage for JsonFileStorage {
    fn load(&self, collection: Collection) -> Result<Option<Mapping>> {
        let Some(mut document) = self.read_document()? else {
            info!(path = %self.path().display(), "No saved ledger found, starting fresh");
            return Ok(None);
        };

        let data = match document.remove(collection.name()) {
            None => return Ok(None),
            Some(serde_json::Value::Object(data)) => data,
            Some(_) => {
                return Err(anyhow!(
                    "{} in {} is not a mapping",
                    collection.name(),
                    self.path().display()
                ))
            }
        };

        info!(
            collection = collection.name(),
            records = data.len(),
            "Collection loaded from disk"
        );
        Ok(Some(data))
    }

    fn save(&self, collection: Collection, data: &Mapping) -> Result<()> {
        self.save_batch(&[(collection, data.clone())])
    }

    /// Collections not in `batch` keep their stored contents.
    fn save_batch(&self, batch: &[(Collection, Mapping)]) -> Result<()> {
        let mut document = self.read_document()?.unwrap_or_default();
        for (collection, data) in batch {
            document.insert(
                collection.name().to_string(),
                serde_json::Value::Object(data.clone()),
            );
        }
        self.write_document(&document)?;
        debug!(collections = batch.len(), "Ledger saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local storage. Saves can be forced to fail for testing the
/// ledger's error paths.
#[derive(Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<Collection, Mapping>>,
    fail_saves: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Current contents of a collection.
    pub fn snapshot(&self, collection: Collection) -> Option<Mapping> {
        self.data
            .read()
            .ok()
            .and_then(|data| data.get(&collection).cloned())
    }
}

impl LedgerStorage for MemoryStorage {
    fn load(&self, collection: Collection) -> Result<Option<Mapping>> {
        let data = self.data.read().map_err(|_| anyhow!("memory storage poisoned"))?;
        Ok(data.get(&collection).cloned())
    }

    fn save(&self, collection: Collection, data: &Mapping) -> Result<()> {
        self.save_batch(&[(collection, data.clone())])
    }

    fn save_batch(&self, batch: &[(Collection, Mapping)]) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow!("memory storage configured to fail saves"));
        }
        let mut data = self.data.write().map_err(|_| anyhow!("memory storage poisoned"))?;
        for (collection, mapping) in batch {
            data.insert(*collection, mapping.clone());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
