//! Error surface of the package lifecycle.
//!
//! Every public operation on [`crate::install::UpdateManager`] returns
//! `Result<T, UpdateError>`; none of them panic or terminate the host.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::diff::DiffError;
use crate::download::DownloadError;
use crate::gc::GcError;
use crate::metadata::MetadataError;
use crate::store_lock::StoreLockError;
use crate::util::hash::DirHashError;

pub type Result<T, E = UpdateError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum UpdateError {
  /// Transport failure. Retryable by the caller.
  #[error("download failed: {0}")]
  Download(#[from] DownloadError),

  /// The materialized package does not hash to the advertised value.
  #[error("package {expected} failed the integrity check (computed {actual})")]
  HashMismatch { expected: String, actual: String },

  /// The base package a diff was built against is not available locally.
  #[error("diff base {hash} is not present locally; request a full package")]
  MissingDiffBase { hash: String },

  /// Filesystem failure while staging or finalizing.
  #[error("disk I/O failed at {}: {source}", path.display())]
  DiskIo {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("no previous package to roll back to")]
  NoPreviousPackage,

  /// The server's update description is malformed.
  #[error("invalid update manifest: {0}")]
  InvalidManifest(String),

  #[error("no staged package is waiting to be installed")]
  NoPendingPackage,

  #[error("package {hash} contains no entry bundle named '{bundle}'")]
  BundleNotFound { hash: String, bundle: String },

  #[error("metadata error: {0}")]
  Metadata(#[from] MetadataError),

  #[error(transparent)]
  Lock(#[from] StoreLockError),

  #[error("failed to hash package contents: {0}")]
  Hash(#[from] DirHashError),

  #[error("garbage collection failed: {0}")]
  Gc(#[from] GcError),
}

impl UpdateError {
  pub(crate) fn disk(path: impl Into<PathBuf>, source: io::Error) -> Self {
    UpdateError::DiskIo {
      path: path.into(),
      source,
    }
  }

  /// An artifact that cannot be read as a package archive is a bad
  /// artifact, not a disk failure.
  pub(crate) fn archive(hash: &str, err: ArchiveError) -> Self {
    match err {
      ArchiveError::Io { path, source } => UpdateError::DiskIo { path, source },
      other => UpdateError::InvalidManifest(format!("artifact for {} is not a valid package archive: {}", hash, other)),
    }
  }

  /// Whether retrying the same request may succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, UpdateError::Download(_))
  }
}

impl From<DiffError> for UpdateError {
  fn from(err: DiffError) -> Self {
    match err {
      DiffError::MissingBase(path) => UpdateError::MissingDiffBase {
        hash: path
          .file_name()
          .map(|n| n.to_string_lossy().into_owned())
          .unwrap_or_else(|| path.display().to_string()),
      },
      DiffError::InvalidManifest(message) => UpdateError::InvalidManifest(message),
      DiffError::Io { path, source } => UpdateError::DiskIo { path, source },
    }
  }
}
