//! Per-OS location of the default support directory.

use std::path::PathBuf;

use crate::consts::APP_NAME;

/// `%APPDATA%\hotload` on Windows, `$XDG_DATA_HOME/hotload` (falling back to
/// `~/.local/share/hotload`) elsewhere.
pub fn data_dir() -> PathBuf {
  base_data_dir().join(APP_NAME)
}

#[cfg(windows)]
fn base_data_dir() -> PathBuf {
  env_path("APPDATA")
    .or_else(|| env_path("USERPROFILE"))
    .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(not(windows))]
fn base_data_dir() -> PathBuf {
  env_path("XDG_DATA_HOME")
    .or_else(|| env_path("HOME").map(|home| home.join(".local").join("share")))
    .unwrap_or_else(|| PathBuf::from("."))
}

/// An environment variable as a path; unset and empty are treated alike.
fn env_path(var: &str) -> Option<PathBuf> {
  std::env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}
