//! Sweep of the updates directory.
//!
//! Removes package folders that metadata no longer references and transient
//! artifacts left behind by an interrupted stage or save. Callers hold the
//! metadata lock so the live set cannot change underneath the sweep. Staging
//! artifacts are only swept when no stage holds the staging lock.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::{fs, io};

use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::metadata::AppMetadata;
use crate::store::{PackageStore, TransientKind};
use crate::store_lock::{LockMode, LockTarget, StoreLock, StoreLockError};

/// Prefix `tempfile` gives files created by an interrupted metadata save.
const TEMP_FILE_PREFIX: &str = ".tmp";

#[derive(Debug, Error)]
pub enum GcError {
  #[error("failed to read updates directory: {0}")]
  ReadUpdates(#[from] io::Error),

  #[error("failed to check for running stages: {0}")]
  Lock(#[from] StoreLockError),
}

#[derive(Debug, Default, serde::Serialize)]
pub struct GcStats {
  pub packages_scanned: usize,
  pub packages_deleted: usize,
  pub packages_bytes_freed: u64,
  pub transient_deleted: usize,
  pub transient_bytes_freed: u64,
}

impl GcStats {
  pub fn total_deleted(&self) -> usize {
    self.packages_deleted + self.transient_deleted
  }

  pub fn total_bytes_freed(&self) -> u64 {
    self.packages_bytes_freed + self.transient_bytes_freed
  }
}

#[derive(Debug, serde::Serialize)]
pub struct GcResult {
  pub stats: GcStats,
  pub deleted_paths: Vec<PathBuf>,
  /// A stage was running, so its download and staging artifacts were left alone.
  pub staging_in_progress: bool,
}

/// Total size of the regular files under `path`.
pub fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}

fn is_transient(name: &str) -> bool {
  if name.starts_with(TEMP_FILE_PREFIX) {
    return true;
  }
  match name.rsplit_once('.') {
    Some((hash, suffix)) => !hash.is_empty() && TransientKind::ALL.iter().any(|kind| kind.suffix() == suffix),
    None => false,
  }
}

pub fn collect_garbage(store: &PackageStore, metadata: &AppMetadata, dry_run: bool) -> Result<GcResult, GcError> {
  let live: HashSet<&str> = metadata.live_hashes().into_iter().collect();
  debug!(count = live.len(), "collected live hashes from metadata");

  let mut stats = GcStats::default();
  let mut deleted_paths = Vec::new();

  let entries = match fs::read_dir(store.updates_dir()) {
    Ok(entries) => entries,
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      return Ok(GcResult {
        stats,
        deleted_paths,
        staging_in_progress: false,
      });
    }
    Err(e) => return Err(e.into()),
  };

  // Held for the whole sweep so no stage starts halfway through.
  let staging_lock = match StoreLock::try_acquire(store.updates_dir(), LockTarget::Staging, LockMode::Exclusive, "gc") {
    Ok(lock) => Some(lock),
    Err(e) if e.is_contention() => {
      info!("a stage is in progress; leaving staging artifacts in place");
      None
    }
    Err(e) => return Err(e.into()),
  };
  let staging_in_progress = staging_lock.is_none();

  for entry in entries.flatten() {
    let path = entry.path();
    let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
      continue;
    };

    if is_transient(&name) {
      if staging_in_progress && !name.starts_with(TEMP_FILE_PREFIX) {
        continue;
      }
      let size = if path.is_dir() {
        dir_size(&path)
      } else {
        entry.metadata().map(|m| m.len()).unwrap_or(0)
      };
      debug!(path = %path.display(), "removing transient artifact");

      if remove(&path, dry_run) {
        stats.transient_deleted += 1;
        stats.transient_bytes_freed += size;
        deleted_paths.push(path);
      }
      continue;
    }

    if !path.is_dir() || name.contains('.') {
      continue;
    }

    stats.packages_scanned += 1;
    if live.contains(name.as_str()) {
      continue;
    }

    let size = dir_size(&path);
    debug!(path = %path.display(), "removing unreferenced package");

    if remove(&path, dry_run) {
      stats.packages_deleted += 1;
      stats.packages_bytes_freed += size;
      deleted_paths.push(path);
    }
  }

  deleted_paths.sort();

  info!(
    packages_deleted = stats.packages_deleted,
    transient_deleted = stats.transient_deleted,
    bytes_freed = stats.total_bytes_freed(),
    dry_run,
    staging_in_progress,
    "garbage collection complete"
  );

  Ok(GcResult {
    stats,
    deleted_paths,
    staging_in_progress,
  })
}

/// Returns whether the path counts as deleted.
fn remove(path: &Path, dry_run: bool) -> bool {
  if dry_run {
    return true;
  }

  let result = if path.is_dir() {
    fs::remove_dir_all(path)
  } else {
    fs::remove_file(path)
  };

  match result {
    Ok(()) => true,
    Err(e) => {
      warn!(path = %path.display(), error = %e, "failed to delete");
      false
    }
  }
}
