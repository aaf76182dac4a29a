use std::collections::BTreeMap;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::package::InstallMode;
use crate::store_lock::StoreLockError;

/// Current version of the metadata file format.
pub const METADATA_VERSION: u32 = 1;

/// Errors that can occur while reading or writing the metadata record.
#[derive(Debug, Error)]
pub enum MetadataError {
  #[error("failed to create updates directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("failed to read metadata: {0}")]
  Read(#[source] io::Error),

  #[error("failed to write metadata: {0}")]
  Write(#[source] io::Error),

  #[error("failed to parse metadata: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize metadata: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported metadata version: {0}")]
  UnsupportedVersion(u32),

  #[error(transparent)]
  Lock(#[from] StoreLockError),
}

/// A deferred activation recorded by `install_pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInstall {
  pub mode: InstallMode,
  /// Only meaningful for `OnNextResume`.
  #[serde(default)]
  pub minimum_background_duration_secs: u64,
}

/// The single durable record describing which packages are live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
  pub version: u32,

  /// Package the host boots; `None` means the binary-bundled package.
  #[serde(default)]
  pub current_package: Option<String>,

  /// Last known-good package, kept as the rollback target.
  #[serde(default)]
  pub previous_package: Option<String>,

  /// Staged, verified package awaiting activation.
  #[serde(default)]
  pub pending_package: Option<String>,

  /// Set once `install_pending` was called with a deferred mode.
  #[serde(default)]
  pub pending_install: Option<PendingInstall>,

  /// True until the current package confirms a successful start.
  #[serde(default)]
  pub is_first_run: bool,

  /// True once an unconfirmed current package has been handed to the host.
  #[serde(default)]
  pub launch_attempted: bool,

  /// Automatic reverts per package hash.
  #[serde(default)]
  pub rollback_count: BTreeMap<String, u32>,
}

impl Default for AppMetadata {
  fn default() -> Self {
    Self {
      version: METADATA_VERSION,
      current_package: None,
      previous_package: None,
      pending_package: None,
      pending_install: None,
      is_first_run: false,
      launch_attempted: false,
      rollback_count: BTreeMap::new(),
    }
  }
}

impl AppMetadata {
  pub fn new() -> Self {
    Self::default()
  }

  /// Whether `hash` is current, previous or pending.
  pub fn references(&self, hash: &str) -> bool {
    [&self.current_package, &self.previous_package, &self.pending_package]
      .iter()
      .any(|slot| slot.as_deref() == Some(hash))
  }

  /// Hashes of every live package.
  pub fn live_hashes(&self) -> Vec<&str> {
    [&self.current_package, &self.previous_package, &self.pending_package]
      .into_iter()
      .filter_map(|slot| slot.as_deref())
      .collect()
  }

  pub fn rollback_count_for(&self, hash: &str) -> u32 {
    self.rollback_count.get(hash).copied().unwrap_or(0)
  }

  /// Whether the current package still awaits confirmation.
  pub fn is_unconfirmed(&self) -> bool {
    self.current_package.is_some() && self.is_first_run
  }
}
