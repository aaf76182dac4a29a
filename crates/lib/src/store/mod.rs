//! Content-addressed package folders.
//!
//! # Layout
//!
//! ```text
//! <support>/updates/
//! ├── <hash>/                 # Finalized package (immutable once renamed in)
//! │   ├── app.json            # LocalPackage record, excluded from the hash
//! │   └── ...                 # Bundle and assets
//! ├── <hash>.download/        # Downloaded artifact file (transient)
//! ├── <hash>.diffmanifest/    # Diff artifact being applied (transient)
//! └── <hash>.staging/         # Package being assembled (transient)
//! ```
//!
//! Packages only become visible under their hash through a single `rename`, so
//! a crash leaves either the old state or a transient directory for `gc`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::UpdaterConfig;
use crate::consts::PACKAGE_FILENAME;
use crate::error::{Result, UpdateError};
use crate::metadata::AppMetadata;
use crate::package::LocalPackage;

/// Kinds of transient directories that live next to package folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
  Download,
  DiffManifest,
  Staging,
}

impl TransientKind {
  pub const ALL: [TransientKind; 3] = [TransientKind::Download, TransientKind::DiffManifest, TransientKind::Staging];

  pub fn suffix(self) -> &'static str {
    match self {
      TransientKind::Download => "download",
      TransientKind::DiffManifest => "diffmanifest",
      TransientKind::Staging => "staging",
    }
  }
}

#[derive(Debug, Clone)]
pub struct PackageStore {
  updates_dir: PathBuf,
  binary_assets_dir: Option<PathBuf>,
  bundle_file_name: String,
}

impl PackageStore {
  pub fn new(config: &UpdaterConfig) -> Self {
    Self {
      updates_dir: config.updates_dir(),
      binary_assets_dir: config.binary_assets_dir.clone(),
      bundle_file_name: config.bundle_file_name.clone(),
    }
  }

  pub fn updates_dir(&self) -> &Path {
    &self.updates_dir
  }

  pub fn bundle_file_name(&self) -> &str {
    &self.bundle_file_name
  }

  pub fn folder_path_for(&self, hash: &str) -> PathBuf {
    self.updates_dir.join(hash)
  }

  pub fn staging_path_for(&self, hash: &str, kind: TransientKind) -> PathBuf {
    self.updates_dir.join(format!("{}.{}", hash, kind.suffix()))
  }

  /// Assets shipped inside the app binary, if the host configured them.
  pub fn binary_assets_path(&self) -> Option<&Path> {
    self.binary_assets_dir.as_deref()
  }

  /// Entry bundle of the binary-bundled package.
  pub fn binary_bundle_path(&self) -> Option<PathBuf> {
    self.binary_assets_path().map(|dir| dir.join(&self.bundle_file_name))
  }

  pub fn exists(&self, hash: &str) -> bool {
    self.folder_path_for(hash).is_dir()
  }

  /// Move a fully written directory into its permanent, hash-keyed location.
  ///
  /// Callers must hold the metadata lock and have checked that no live
  /// package uses `hash`; a stale folder at the target is replaced.
  pub fn finalize(&self, temp: &Path, hash: &str) -> Result<PathBuf> {
    let target = self.folder_path_for(hash);

    remove_dir_if_exists(&target)?;
    fs::rename(temp, &target).map_err(|e| UpdateError::disk(&target, e))?;
    sync_dir(&self.updates_dir);

    debug!(hash, path = %target.display(), "finalized package");
    Ok(target)
  }

  /// Remove a package folder unless metadata still references it.
  ///
  /// Returns whether a folder was removed. Failures are logged, never raised.
  pub fn delete(&self, hash: &str, metadata: &AppMetadata) -> bool {
    if metadata.references(hash) {
      warn!(hash, "refusing to delete a package that is still referenced");
      return false;
    }

    let path = self.folder_path_for(hash);
    match fs::remove_dir_all(&path) {
      Ok(()) => {
        debug!(hash, "deleted package");
        true
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => false,
      Err(e) => {
        warn!(hash, error = %e, "failed to delete package folder");
        false
      }
    }
  }

  /// Best-effort removal of every transient artifact for `hash`.
  pub fn remove_transient(&self, hash: &str) {
    for kind in TransientKind::ALL {
      let path = self.staging_path_for(hash, kind);
      if let Err(e) = remove_path_if_exists(&path) {
        warn!(path = %path.display(), error = %e, "failed to remove transient directory");
      }
    }
  }

  /// Hashes of every finalized package folder, sorted.
  pub fn package_hashes(&self) -> Result<Vec<String>> {
    let entries = match fs::read_dir(&self.updates_dir) {
      Ok(entries) => entries,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(UpdateError::disk(&self.updates_dir, e)),
    };

    let mut hashes: Vec<String> = entries
      .flatten()
      .filter(|entry| entry.path().is_dir())
      .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
      .filter(|name| !name.contains('.'))
      .collect();
    hashes.sort();
    Ok(hashes)
  }

  /// Read `<hash>/app.json`. Returns `None` if the package is not present.
  pub fn read_package(&self, hash: &str) -> Result<Option<LocalPackage>> {
    let path = self.folder_path_for(hash).join(PACKAGE_FILENAME);

    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(UpdateError::disk(&path, e)),
    };

    serde_json::from_str(&content)
      .map(Some)
      .map_err(|e| UpdateError::InvalidManifest(format!("{}: {}", path.display(), e)))
  }

  /// Write the package record into a (not yet finalized) folder.
  pub fn write_package(&self, folder: &Path, package: &LocalPackage) -> Result<()> {
    let path = folder.join(PACKAGE_FILENAME);
    let content =
      serde_json::to_string_pretty(package).map_err(|e| UpdateError::disk(&path, io::Error::other(e)))?;
    fs::write(&path, content).map_err(|e| UpdateError::disk(&path, e))
  }

  /// Locate the entry bundle inside a package tree.
  ///
  /// Returns the `/`-separated path relative to `folder`. The shallowest
  /// match wins; ties are broken by name.
  pub fn find_bundle(&self, folder: &Path) -> Option<String> {
    WalkDir::new(folder)
      .follow_links(false)
      .sort_by_file_name()
      .into_iter()
      .filter_map(|entry| entry.ok())
      .filter(|entry| entry.file_type().is_file() && entry.file_name() == self.bundle_file_name.as_str())
      .min_by_key(|entry| entry.depth())
      .map(|entry| {
        entry
          .path()
          .strip_prefix(folder)
          .unwrap_or(entry.path())
          .components()
          .map(|c| c.as_os_str().to_string_lossy())
          .collect::<Vec<_>>()
          .join("/")
      })
  }

  /// Absolute path of a package's entry bundle.
  pub fn bundle_path_for(&self, package: &LocalPackage) -> PathBuf {
    let mut path = self.folder_path_for(package.hash());
    for part in package.bundle_path.split('/') {
      path.push(part);
    }
    path
  }
}

/// `remove_dir_all` that treats a missing directory as success.
pub(crate) fn remove_dir_if_exists(path: &Path) -> Result<()> {
  match fs::remove_dir_all(path) {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(UpdateError::disk(path, e)),
  }
}

/// Remove a file, symlink or directory tree; missing paths are fine.
pub(crate) fn remove_path_if_exists(path: &Path) -> Result<()> {
  let meta = match fs::symlink_metadata(path) {
    Ok(meta) => meta,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
    Err(e) => return Err(UpdateError::disk(path, e)),
  };

  let result = if meta.is_dir() {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  };
  result.map_err(|e| UpdateError::disk(path, e))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
  if let Ok(handle) = fs::File::open(dir) {
    let _ = handle.sync_all();
  }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
