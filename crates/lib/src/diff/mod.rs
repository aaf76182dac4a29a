//! Reconstruct a full package from a base package plus a diff artifact.
//!
//! A diff artifact is an extracted folder holding the added or changed files
//! at their final paths, plus a `hotload.json` manifest naming the paths that
//! no longer exist:
//!
//! ```json
//! { "deletedFiles": ["old/screen.js", "assets/unused"] }
//! ```
//!
//! The applier never verifies its result; the caller hashes the staged folder.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::consts::{DIFF_MANIFEST_FILENAME, PACKAGE_FILENAME};
use crate::util::hash::relative_key;

#[derive(Debug, Error)]
pub enum DiffError {
  #[error("diff base {} does not exist", .0.display())]
  MissingBase(PathBuf),

  #[error("invalid diff manifest: {0}")]
  InvalidManifest(String),

  #[error("I/O error at {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> DiffError + '_ {
  move |source| DiffError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Contents of `hotload.json` inside a diff artifact.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffManifest {
  pub deleted_files: Vec<String>,
}

impl DiffManifest {
  pub fn load(diff_folder: &Path) -> Result<Self, DiffError> {
    let path = diff_folder.join(DIFF_MANIFEST_FILENAME);
    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        return Err(DiffError::InvalidManifest(format!(
          "diff artifact has no {}",
          DIFF_MANIFEST_FILENAME
        )));
      }
      Err(e) => return Err(io_err(&path)(e)),
    };

    serde_json::from_str(&content).map_err(|e| DiffError::InvalidManifest(e.to_string()))
  }

  /// Deleted paths as `/`-separated keys relative to the package root.
  fn deleted_keys(&self) -> Result<BTreeSet<String>, DiffError> {
    self.deleted_files.iter().map(|raw| normalize_key(raw)).collect()
  }
}

/// `"./a\\b/"` -> `"a/b"`. Absolute paths and `..` are rejected.
fn normalize_key(raw: &str) -> Result<String, DiffError> {
  let unified = raw.replace('\\', "/");
  let mut parts = Vec::new();
  for part in unified.split('/') {
    match part {
      "" | "." => continue,
      ".." => return Err(DiffError::InvalidManifest(format!("deleted path '{}' escapes the package", raw))),
      other => parts.push(other),
    }
  }
  if unified.starts_with('/') || parts.is_empty() {
    return Err(DiffError::InvalidManifest(format!("deleted path '{}' is not relative", raw)));
  }
  Ok(parts.join("/"))
}

/// Whether `key` or one of its ancestors is in `deleted`.
fn is_deleted(key: &str, deleted: &BTreeSet<String>) -> bool {
  if deleted.contains(key) {
    return true;
  }
  key
    .match_indices('/')
    .any(|(idx, _)| deleted.contains(&key[..idx]))
}

/// Build `staging` from `base` minus deleted entries, overlaid with the diff.
///
/// `staging` must not exist yet. The base's `app.json` and the diff's own
/// manifest are never carried into the result.
pub fn apply_diff(base: &Path, diff_folder: &Path, staging: &Path) -> Result<PathBuf, DiffError> {
  if !base.is_dir() {
    return Err(DiffError::MissingBase(base.to_path_buf()));
  }

  let manifest = DiffManifest::load(diff_folder)?;
  let deleted = manifest.deleted_keys()?;

  info!(
    base = %base.display(),
    deleted = deleted.len(),
    "applying diff"
  );

  fs::create_dir_all(staging).map_err(io_err(staging))?;

  let copied = copy_tree(base, staging, |key| key == PACKAGE_FILENAME || is_deleted(key, &deleted))?;
  let overlaid = copy_tree(diff_folder, staging, |key| key == DIFF_MANIFEST_FILENAME)?;

  debug!(copied, overlaid, staging = %staging.display(), "diff applied");
  Ok(staging.to_path_buf())
}

/// Copy `src` into `dest`, overwriting same-path files. `skip` receives the
/// `/`-separated relative key; a skipped directory prunes its subtree.
fn copy_tree(src: &Path, dest: &Path, skip: impl Fn(&str) -> bool) -> Result<usize, DiffError> {
  let mut copied = 0;

  let walker = WalkDir::new(src)
    .follow_links(false)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| e.depth() == 0 || !skip(&relative_key(src, e.path())));

  for entry in walker {
    let entry = entry.map_err(|e| {
      let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
      DiffError::Io {
        path,
        source: e.into_io_error().unwrap_or_else(|| io::Error::other("filesystem loop")),
      }
    })?;
    if entry.depth() == 0 {
      continue;
    }

    let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
    let target = dest.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      // An overlay may turn a base file into a directory.
      if target.is_file() {
        fs::remove_file(&target).map_err(io_err(&target))?;
      }
      fs::create_dir_all(&target).map_err(io_err(&target))?;
    } else if file_type.is_file() {
      if target.is_dir() {
        fs::remove_dir_all(&target).map_err(io_err(&target))?;
      }
      fs::copy(entry.path(), &target).map_err(io_err(&target))?;
      copied += 1;
    } else if file_type.is_symlink() {
      copy_symlink(entry.path(), &target)?;
      copied += 1;
    }
  }

  Ok(copied)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, target: &Path) -> Result<(), DiffError> {
  let link = fs::read_link(src).map_err(io_err(src))?;
  if fs::symlink_metadata(target).is_ok() {
    fs::remove_file(target).map_err(io_err(target))?;
  }
  std::os::unix::fs::symlink(link, target).map_err(io_err(target))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, target: &Path) -> Result<(), DiffError> {
  fs::copy(src, target).map_err(io_err(target))?;
  Ok(())
}
