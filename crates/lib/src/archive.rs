//! Downloaded artifact handling.
//!
//! A package artifact is either a zip archive (full package or diff) or a raw
//! entry bundle. Zips are recognized by their local-header magic, not by the
//! URL, since update servers commonly serve them without an extension.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

const ZIP_MAGIC: [u8; 4] = [b'P', b'K', 0x03, 0x04];

#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("failed to read artifact {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid zip archive: {0}")]
  Zip(String),

  #[error("zip entry '{0}' escapes the extraction directory")]
  UnsafeEntry(String),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
  move |source| ArchiveError::Io {
    path: path.to_path_buf(),
    source,
  }
}

/// Whether the file starts with the zip local-header signature.
pub fn is_zip(path: &Path) -> Result<bool, ArchiveError> {
  let mut file = File::open(path).map_err(io_err(path))?;
  let mut magic = [0u8; 4];
  match file.read_exact(&mut magic) {
    Ok(()) => Ok(magic == ZIP_MAGIC),
    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
    Err(e) => Err(io_err(path)(e)),
  }
}

/// Extract a zip archive into `dest`, creating it if needed.
///
/// Returns the number of files written.
pub fn extract_zip(archive_path: &Path, dest: &Path) -> Result<usize, ArchiveError> {
  let file = File::open(archive_path).map_err(io_err(archive_path))?;
  let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| ArchiveError::Zip(e.to_string()))?;

  fs::create_dir_all(dest).map_err(io_err(dest))?;

  let mut written = 0;
  for i in 0..archive.len() {
    let mut entry = archive.by_index(i).map_err(|e| ArchiveError::Zip(e.to_string()))?;

    let rel = entry
      .enclosed_name()
      .ok_or_else(|| ArchiveError::UnsafeEntry(entry.name().to_string()))?;
    if rel.as_os_str().is_empty() {
      continue;
    }

    let dest_path = dest.join(&rel);

    if entry.is_dir() {
      fs::create_dir_all(&dest_path).map_err(io_err(&dest_path))?;
      continue;
    }

    if let Some(parent) = dest_path.parent() {
      fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let mut outfile = File::create(&dest_path).map_err(io_err(&dest_path))?;
    io::copy(&mut entry, &mut outfile).map_err(io_err(&dest_path))?;

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      if let Some(mode) = entry.unix_mode() {
        fs::set_permissions(&dest_path, fs::Permissions::from_mode(mode & 0o777)).map_err(io_err(&dest_path))?;
      }
    }

    written += 1;
  }

  debug!(archive = %archive_path.display(), files = written, "extracted artifact");
  Ok(written)
}
