//! Updater configuration.
//!
//! The host constructs one [`UpdaterConfig`] and hands it to
//! [`crate::install::UpdateManager::open`]. Every path the lifecycle touches is
//! derived from it, so tests isolate themselves by pointing `support_dir` at a
//! temporary directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::{DEFAULT_BUNDLE_FILENAME, ROOT_ENV_VAR, UPDATES_DIR};
use crate::platform::data_dir;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdaterConfig {
  /// Application-private support directory; packages live in `<support_dir>/updates`.
  pub support_dir: PathBuf,

  /// Assets bundled into the app binary ("package zero").
  #[serde(default)]
  pub binary_assets_dir: Option<PathBuf>,

  /// File name of the entry bundle inside a package.
  #[serde(default = "default_bundle_file_name")]
  pub bundle_file_name: String,

  /// Version of the running app binary. Packages staged against another
  /// binary version are discarded at the next bundle resolution.
  #[serde(default)]
  pub binary_version: Option<String>,

  /// Hash of the binary-bundled package, accepted as a diff base.
  #[serde(default)]
  pub binary_package_hash: Option<String>,
}

fn default_bundle_file_name() -> String {
  DEFAULT_BUNDLE_FILENAME.to_string()
}

impl UpdaterConfig {
  pub fn new(support_dir: impl Into<PathBuf>) -> Self {
    Self {
      support_dir: support_dir.into(),
      binary_assets_dir: None,
      bundle_file_name: default_bundle_file_name(),
      binary_version: None,
      binary_package_hash: None,
    }
  }

  /// Configuration rooted at `$HOTLOAD_ROOT`, or the platform data directory.
  pub fn from_env() -> Self {
    Self::new(Self::default_support_dir())
  }

  pub fn default_support_dir() -> PathBuf {
    if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
      return PathBuf::from(path);
    }

    data_dir()
  }

  /// Load a JSON config file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  pub fn with_binary_assets(mut self, dir: impl Into<PathBuf>) -> Self {
    self.binary_assets_dir = Some(dir.into());
    self
  }

  pub fn with_bundle_file_name(mut self, name: impl Into<String>) -> Self {
    self.bundle_file_name = name.into();
    self
  }

  pub fn with_binary_version(mut self, version: impl Into<String>) -> Self {
    self.binary_version = Some(version.into());
    self
  }

  pub fn with_binary_package_hash(mut self, hash: impl Into<String>) -> Self {
    self.binary_package_hash = Some(hash.into());
    self
  }

  pub fn updates_dir(&self) -> PathBuf {
    self.support_dir.join(UPDATES_DIR)
  }
}
