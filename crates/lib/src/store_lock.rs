//! File-based locking of the updates directory.
//!
//! Two lock files live in the updates directory:
//! - `.lock` serializes every metadata mutation. The in-process mutex in
//!   [`crate::metadata::MetadataStore`] serializes threads; this lock
//!   serializes processes (an operator CLI running next to the host app).
//! - `.stage.lock` is held shared by every running stage for as long as its
//!   transient artifacts exist. The sweep tries it without waiting and
//!   leaves transient artifacts alone while any stage holds it.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which lock file to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTarget {
  Metadata,
  Staging,
}

impl LockTarget {
  pub fn file_name(self) -> &'static str {
    match self {
      LockTarget::Metadata => ".lock",
      LockTarget::Staging => ".stage.lock",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub updates_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error(
    "Updates directory is locked by another process: {command} (PID {pid}, started {started_at})\n\
             If you're sure no hotload process is running, remove the lock file:\n  {lock_path}"
  )]
  Contention {
    command: String,
    pid: u32,
    started_at: String,
    lock_path: PathBuf,
  },

  #[error(
    "Updates directory is locked (could not read lock metadata)\n\
             If you're sure no hotload process is running, remove the lock file:\n  {lock_path}"
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error("Failed to create updates directory: {0}")]
  CreateDir(#[source] io::Error),

  #[error("Failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("Failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("Failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

impl StoreLockError {
  /// Whether another holder has the lock.
  pub fn is_contention(&self) -> bool {
    matches!(
      self,
      StoreLockError::Contention { .. } | StoreLockError::ContentionUnknown { .. }
    )
  }
}

/// Held advisory lock; released when dropped.
pub struct StoreLock {
  _file: File,
  lock_path: PathBuf,
}

impl StoreLock {
  /// Try to take the lock, failing immediately on contention.
  pub fn try_acquire(
    updates_dir: &Path,
    target: LockTarget,
    mode: LockMode,
    command: &str,
  ) -> Result<Self, StoreLockError> {
    Self::acquire_inner(updates_dir, target, mode, command, false)
  }

  /// Take the lock, waiting for other holders to release it.
  pub fn acquire(
    updates_dir: &Path,
    target: LockTarget,
    mode: LockMode,
    command: &str,
  ) -> Result<Self, StoreLockError> {
    Self::acquire_inner(updates_dir, target, mode, command, true)
  }

  fn acquire_inner(
    updates_dir: &Path,
    target: LockTarget,
    mode: LockMode,
    command: &str,
    wait: bool,
  ) -> Result<Self, StoreLockError> {
    let lock_path = updates_dir.join(target.file_name());

    if !updates_dir.exists() {
      std::fs::create_dir_all(updates_dir).map_err(StoreLockError::CreateDir)?;
    }

    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(&lock_path)
      .map_err(StoreLockError::OpenFile)?;

    if let Err(err) = lock_file(&file, mode, wait) {
      if err.kind() == io::ErrorKind::WouldBlock {
        return Err(Self::read_contention_error(&lock_path));
      }
      return Err(StoreLockError::LockFailed(err));
    }

    if mode == LockMode::Exclusive {
      Self::write_metadata(&file, command, updates_dir)?;
    }

    Ok(StoreLock { _file: file, lock_path })
  }

  fn write_metadata(file: &File, command: &str, updates_dir: &Path) -> Result<(), StoreLockError> {
    let metadata = LockMetadata {
      version: 1,
      pid: std::process::id(),
      started_at_unix: SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs(),
      command: command.to_string(),
      updates_dir: updates_dir.to_path_buf(),
    };

    file.set_len(0).map_err(StoreLockError::WriteMetadata)?;
    let mut writer = io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &metadata)
      .map_err(|e| StoreLockError::WriteMetadata(io::Error::other(e)))?;
    writer.flush().map_err(StoreLockError::WriteMetadata)?;

    Ok(())
  }

  fn read_contention_error(lock_path: &Path) -> StoreLockError {
    if let Ok(mut file) = File::open(lock_path) {
      let mut contents = String::new();
      if file.read_to_string(&mut contents).is_ok()
        && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
      {
        let started_at = format!("Unix timestamp {}", metadata.started_at_unix);

        return StoreLockError::Contention {
          command: metadata.command,
          pid: metadata.pid,
          started_at,
          lock_path: lock_path.to_path_buf(),
        };
      }
    }

    StoreLockError::ContentionUnknown {
      lock_path: lock_path.to_path_buf(),
    }
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

#[cfg(unix)]
fn lock_file(file: &File, mode: LockMode, wait: bool) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match (mode, wait) {
    (LockMode::Shared, false) => FlockOperation::NonBlockingLockShared,
    (LockMode::Exclusive, false) => FlockOperation::NonBlockingLockExclusive,
    (LockMode::Shared, true) => FlockOperation::LockShared,
    (LockMode::Exclusive, true) => FlockOperation::LockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock_file(file: &File, mode: LockMode, wait: bool) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let mut flags = match mode {
    LockMode::Shared => 0,
    LockMode::Exclusive => LOCKFILE_EXCLUSIVE_LOCK,
  };
  if !wait {
    flags |= LOCKFILE_FAIL_IMMEDIATELY;
  }

  // SAFETY: OVERLAPPED is a plain data struct that is valid when zero-initialized.
  // LockFileEx is safe to call with a valid file handle and zeroed OVERLAPPED.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}
