//! Durable tailer checkpoints.
//!
//! Each tailed file persists `(offset, carry-cache, signature, identity)`
//! keyed by `(config, device, inode, path)` so a restarted agent resumes
//! exactly where it left off: restoring a checkpoint reproduces a
//! byte-identical carry-cache, and the next framing pass yields the same
//! records a continuously-running tailer would have produced.
//!
//! The store is an opaque JSON key-value file written atomically (temp file,
//! fsync, rename).

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::tail::encoding::FileEncoding;
use crate::tail::framer::FrameModeKind;
use crate::tail::source::{DevInode, FileSignature};

/// Persisted state of one tailer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub dev_inode: DevInode,
    pub offset: u64,
    pub signature: FileSignature,
    /// Carry bytes read but not yet framed into complete records.
    pub cache: Vec<u8>,
    pub encoding: FileEncoding,
    pub mode: FrameModeKind,
    /// Unix seconds of the last successful read.
    pub last_read_time: u64,
}

/// Errors from loading or persisting the checkpoint file.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Process-wide checkpoint store, shared by every tailer of the agent and
/// flushed periodically by the checkpoint persister.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, CheckpointRecord>>,
}

impl CheckpointStore {
    /// Loads the store from `path`. A missing file yields an empty store; an
    /// unreadable one is logged and discarded rather than blocking startup.
    #[must_use]
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("discarding unreadable checkpoint file {:?}: {}", path, e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!("failed to read checkpoint file {:?}: {}", path, e);
                HashMap::new()
            }
        };
        CheckpointStore {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// Store key for one tailed file under one pipeline config.
    #[must_use]
    pub fn key(config: &str, dev_inode: DevInode, path: &Path) -> String {
        format!(
            "{}\u{1}{}\u{1}{}\u{1}{}",
            config,
            dev_inode.device,
            dev_inode.inode,
            path.display()
        )
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<CheckpointRecord> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn update(&self, key: String, record: CheckpointRecord) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, record);
    }

    pub fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the store to disk: temp file in the same directory, fsync,
    /// atomic rename over the target.
    pub fn persist(&self) -> Result<(), CheckpointError> {
        let snapshot = {
            let entries = self
                .entries
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            serde_json::to_vec(&*entries)?
        };
        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&snapshot)?;
        file.sync_all()?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
