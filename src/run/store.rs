//! Per-thread run slots.
//!
//! A slot maps a thread id to the last run started on it, so a run can still
//! be cancelled after the client reconnects. Slots are cleared when the run
//! finishes or is cancelled.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RunweaveError;

/// Key prefix of a run slot.
pub const RUN_SLOT_PREFIX: &str = "lg:stream:";

/// Storage key for a thread's run slot.
pub fn slot_key(thread_id: &str) -> String {
    format!("{RUN_SLOT_PREFIX}{thread_id}")
}

/// Storage abstraction for run slots.
pub trait RunSlotStore: Send + Sync {
    fn load(&self, thread_id: &str) -> Result<Option<String>, RunweaveError>;
    fn save(&self, thread_id: &str, run_id: &str) -> Result<(), RunweaveError>;
    fn clear(&self, thread_id: &str) -> Result<(), RunweaveError>;
}

/// Volatile slots that live as long as the client session.
#[derive(Debug, Default)]
pub struct MemoryRunSlotStore {
    slots: RwLock<HashMap<String, String>>,
}

impl MemoryRunSlotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RunSlotStore for MemoryRunSlotStore {
    fn load(&self, thread_id: &str) -> Result<Option<String>, RunweaveError> {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.get(&slot_key(thread_id)).cloned())
    }

    fn save(&self, thread_id: &str, run_id: &str) -> Result<(), RunweaveError> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.insert(slot_key(thread_id), run_id.to_string());
        Ok(())
    }

    fn clear(&self, thread_id: &str) -> Result<(), RunweaveError> {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots.remove(&slot_key(thread_id));
        Ok(())
    }
}

/// File-backed slots (one TOML file per thread) that survive a restart.
///
/// # Example
/// ```no_run
/// use runweave::run::{FileRunSlotStore, RunSlotStore};
///
/// let store = FileRunSlotStore::new_default();
/// store.save("thread-1", "run-1")?;
/// assert_eq!(store.load("thread-1")?.as_deref(), Some("run-1"));
/// # Ok::<(), runweave::error::RunweaveError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileRunSlotStore {
    base_dir: PathBuf,
}

impl FileRunSlotStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn new_default() -> Self {
        Self::new(default_slot_dir())
    }

    fn slot_path(&self, thread_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.toml", file_stem(thread_id)))
    }

    fn read_slot(path: &Path) -> Result<Option<RunSlotFile>, RunweaveError> {
        let raw = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(toml::from_str(&raw)?))
    }

    fn ensure_parent(path: &Path) -> Result<(), RunweaveError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl RunSlotStore for FileRunSlotStore {
    fn load(&self, thread_id: &str) -> Result<Option<String>, RunweaveError> {
        let Some(file) = Self::read_slot(&self.slot_path(thread_id))? else {
            return Ok(None);
        };
        // Only trust a file written for this exact thread.
        Ok((file.key == slot_key(thread_id)).then_some(file.run_id))
    }

    fn save(&self, thread_id: &str, run_id: &str) -> Result<(), RunweaveError> {
        let path = self.slot_path(thread_id);
        Self::ensure_parent(&path)?;
        let file = RunSlotFile {
            version: 1,
            key: slot_key(thread_id),
            run_id: run_id.to_string(),
            saved_at: Utc::now(),
        };
        fs::write(&path, toml::to_string(&file)?)?;
        Ok(())
    }

    fn clear(&self, thread_id: &str) -> Result<(), RunweaveError> {
        let path = self.slot_path(thread_id);
        match Self::read_slot(&path) {
            Ok(Some(file)) if file.key != slot_key(thread_id) => return Ok(()),
            Ok(None) => return Ok(()),
            // A corrupt slot file is removed as well.
            Ok(Some(_)) | Err(RunweaveError::Storage(_)) => {}
            Err(err) => return Err(err),
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunSlotFile {
    version: u32,
    key: String,
    run_id: String,
    saved_at: DateTime<Utc>,
}

fn default_slot_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".runweave").join("run-slots"))
        .unwrap_or_else(|| PathBuf::from(".runweave/run-slots"))
}

/// File name for a thread id. Lowercase letters, digits and `-` pass through;
/// every other byte becomes `_xx`, so distinct ids never share a file.
fn file_stem(thread_id: &str) -> String {
    if thread_id.is_empty() {
        return "_".to_string();
    }
    let mut stem = String::with_capacity(thread_id.len());
    for byte in thread_id.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("_{byte:02x}"));
        }
    }
    stem
}
