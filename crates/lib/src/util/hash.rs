//! Hashing utilities for content-addressed package folders.
//!
//! This module provides:
//! - `ContentHash`: A full 64-character hash identifying a package or file
//! - `hash_folder()`: Deterministic folder hashing, shared with the release server
//! - `hash_file()`: Single file hashing
//! - `hash_bytes()`: Arbitrary byte hashing
//!
//! # Folder hash format
//!
//! Each regular file contributes `"<relpath>:<sha256>"`, where `relpath` always
//! uses `/` separators. Symlinks contribute the hash of their target path.
//! Directories contribute nothing on their own. The entries are sorted
//! byte-wise, serialized as a compact JSON array and the SHA-256 of that text
//! is the package hash.

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::consts::HASH_EXCLUDES;
use crate::error::UpdateError;

/// A full 64-character SHA256 hash.
///
/// # Format
///
/// The hash is a lowercase hexadecimal string (64 characters).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error during folder hashing.
#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {message}")]
  ReadFile { path: String, message: String },

  #[error("failed to read symlink {path}: {message}")]
  ReadSymlink { path: String, message: String },

  #[error("failed to encode folder manifest: {0}")]
  Encode(#[from] serde_json::Error),
}

/// Build the sorted `"<relpath>:<digest>"` entries for a folder.
///
/// Exposed separately so diagnostics can show which entry differs.
pub fn folder_entries(path: &Path, exclude: &[&str]) -> Result<Vec<String>, DirHashError> {
  let mut entries: Vec<String> = Vec::new();

  let walker = WalkDir::new(path)
    .follow_links(false)
    .sort_by_file_name()
    .into_iter()
    .filter_entry(|e| {
      e.depth() != 1
        || e
          .file_name()
          .to_str()
          .map(|name| !exclude.contains(&name))
          .unwrap_or(true)
    });

  for entry in walker {
    let entry = entry.map_err(|e| DirHashError::WalkDir { message: e.to_string() })?;
    if entry.depth() == 0 {
      continue;
    }

    let entry_path = entry.path();
    let rel_path = relative_key(path, entry_path);

    let file_type = entry.file_type();
    if file_type.is_file() {
      let content_hash = hash_file(entry_path)?;
      entries.push(format!("{}:{}", rel_path, content_hash.0));
    } else if file_type.is_symlink() {
      let target = fs::read_link(entry_path).map_err(|e| DirHashError::ReadSymlink {
        path: entry_path.display().to_string(),
        message: e.to_string(),
      })?;
      let target_hash = hash_bytes(target.to_string_lossy().as_bytes());
      entries.push(format!("{}:{}", rel_path, target_hash.0));
    }
    // Directories and special files carry no content of their own.
  }

  // WalkDir sorts per directory by OS string; the contract is a byte-wise sort
  // of the whole relative path.
  entries.sort();
  Ok(entries)
}

/// Compute the deterministic hash of a folder tree.
///
/// # Arguments
///
/// * `path` - The folder to hash
/// * `exclude` - File/directory names skipped at the top level only (e.g., `&["app.json"]`)
///
/// # Example
///
/// ```ignore
/// let hash = hash_folder(&package_dir, HASH_EXCLUDES)?;
/// ```
pub fn hash_folder(path: &Path, exclude: &[&str]) -> Result<ContentHash, DirHashError> {
  let entries = folder_entries(path, exclude)?;
  // serde_json does not escape `/`, which keeps the text identical to what
  // the release server hashes.
  let manifest = serde_json::to_string(&entries)?;
  Ok(hash_bytes(manifest.as_bytes()))
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA256 hash of the file.
pub fn hash_file(path: &Path) -> Result<ContentHash, DirHashError> {
  let mut file = fs::File::open(path).map_err(|e| DirHashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| DirHashError::ReadFile {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(hex::encode(hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(hex::encode(hasher.finalize()))
}

/// Check a folder against an expected hash.
///
/// Comparison ignores ASCII case so that servers emitting uppercase hex are accepted.
pub fn verify(path: &Path, expected: &str, exclude: &[&str]) -> Result<bool, DirHashError> {
  let actual = hash_folder(path, exclude)?;
  Ok(actual.0.eq_ignore_ascii_case(expected))
}

/// Check a package folder against its advertised hash.
///
/// `app.json` is always excluded. A mismatch is [`UpdateError::HashMismatch`].
pub fn verify_folder(path: &Path, expected: &str) -> Result<(), UpdateError> {
  let actual = hash_folder(path, HASH_EXCLUDES)?;
  if actual.0.eq_ignore_ascii_case(expected) {
    Ok(())
  } else {
    Err(UpdateError::HashMismatch {
      expected: expected.to_string(),
      actual: actual.0,
    })
  }
}

/// `/`-separated path of `entry` relative to `root`, independent of platform.
pub(crate) fn relative_key(root: &Path, entry: &Path) -> String {
  let rel = entry.strip_prefix(root).unwrap_or(entry);
  rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}
