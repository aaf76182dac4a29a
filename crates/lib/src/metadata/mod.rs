//! Durable `AppMetadata` storage.
//!
//! # Storage Layout
//!
//! ```text
//! <support>/updates/
//! ├── .lock               # Advisory lock held while mutating
//! ├── .stage.lock         # Held shared by running stages
//! └── metadata.json       # AppMetadata, atomically rewritten
//! ```
//!
//! The store is the only writer of `metadata.json`. Every change goes through
//! [`MetadataStore::mutate`], which loads, applies a closure and saves while
//! holding both an in-process mutex and the cross-process file lock.

mod types;

pub use types::{AppMetadata, METADATA_VERSION, MetadataError, PendingInstall};

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::NamedTempFile;
use tracing::debug;

use crate::consts::METADATA_FILENAME;
use crate::store_lock::{LockMode, LockTarget, StoreLock};

/// Manages the metadata file on disk.
#[derive(Debug)]
pub struct MetadataStore {
  updates_dir: PathBuf,
  write_lock: Mutex<()>,
}

impl MetadataStore {
  pub fn new(updates_dir: PathBuf) -> Self {
    Self {
      updates_dir,
      write_lock: Mutex::new(()),
    }
  }

  pub fn path(&self) -> PathBuf {
    self.updates_dir.join(METADATA_FILENAME)
  }

  fn ensure_dir(&self) -> Result<(), MetadataError> {
    fs::create_dir_all(&self.updates_dir).map_err(MetadataError::CreateDir)
  }

  /// Load the metadata record.
  ///
  /// Returns a default record if the file doesn't exist (first run of the app).
  pub fn load(&self) -> Result<AppMetadata, MetadataError> {
    let path = self.path();

    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(AppMetadata::new()),
      Err(e) => return Err(MetadataError::Read(e)),
    };

    let metadata: AppMetadata = serde_json::from_str(&content).map_err(MetadataError::Parse)?;

    if metadata.version != METADATA_VERSION {
      return Err(MetadataError::UnsupportedVersion(metadata.version));
    }

    Ok(metadata)
  }

  /// Save the metadata record.
  ///
  /// Writes a temp file in the same directory, syncs it, then renames it over
  /// the previous record so readers only ever see a complete file.
  pub fn save(&self, metadata: &AppMetadata) -> Result<(), MetadataError> {
    self.ensure_dir()?;

    let content = serde_json::to_string_pretty(metadata).map_err(MetadataError::Serialize)?;

    let mut temp = NamedTempFile::new_in(&self.updates_dir).map_err(MetadataError::Write)?;
    temp.write_all(content.as_bytes()).map_err(MetadataError::Write)?;
    temp.as_file().sync_all().map_err(MetadataError::Write)?;
    temp.persist(self.path()).map_err(|e| MetadataError::Write(e.error))?;

    sync_dir(&self.updates_dir);
    Ok(())
  }

  /// Load, apply `f`, and save under the process-wide and cross-process locks.
  ///
  /// Nothing is written when `f` fails or leaves the record unchanged.
  pub fn mutate<T, E, F>(&self, command: &str, f: F) -> Result<T, E>
  where
    F: FnOnce(&mut AppMetadata) -> Result<T, E>,
    E: From<MetadataError>,
  {
    // The guarded value is `()`; a panic in another writer cannot leave it torn.
    let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    self.ensure_dir()?;
    let _file_lock = StoreLock::acquire(&self.updates_dir, LockTarget::Metadata, LockMode::Exclusive, command)
      .map_err(MetadataError::from)?;

    let before = self.load()?;
    let mut metadata = before.clone();
    let value = f(&mut metadata)?;

    if metadata != before {
      debug!(command, "saving metadata");
      self.save(&metadata)?;
    }

    Ok(value)
  }

  pub fn updates_dir(&self) -> &Path {
    &self.updates_dir
  }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
  if let Ok(handle) = fs::File::open(dir) {
    let _ = handle.sync_all();
  }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
