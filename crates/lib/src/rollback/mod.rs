//! Bundle resolution with automatic recovery from unconfirmed boots.
//!
//! The host asks [`UpdateManager::resolve_bundle_url`] what to boot every time
//! it starts the interpreter. A package that was handed to the host and never
//! confirmed with `notify_application_ready` is treated as a crash and reverted
//! before anything is returned.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{Result, UpdateError};
use crate::install::UpdateManager;
use crate::install::state;
use crate::metadata::AppMetadata;

/// What the host should boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BundleLocation {
  /// An installed update.
  Package { hash: String, path: PathBuf },
  /// The bundle shipped inside the app binary; `None` if none is configured.
  Binary { path: Option<PathBuf> },
}

impl BundleLocation {
  pub fn path(&self) -> Option<&PathBuf> {
    match self {
      BundleLocation::Package { path, .. } => Some(path),
      BundleLocation::Binary { path } => path.as_ref(),
    }
  }

  pub fn hash(&self) -> Option<&str> {
    match self {
      BundleLocation::Package { hash, .. } => Some(hash),
      BundleLocation::Binary { .. } => None,
    }
  }
}

impl UpdateManager {
  /// Decide which bundle the host boots, reverting an unconfirmed boot first.
  pub fn resolve_bundle_url(&self) -> Result<BundleLocation> {
    let (location, dropped) = self.metadata.mutate("resolve", |m| -> Result<(BundleLocation, Vec<String>)> {
      if self.installed_for_other_binary(m) {
        info!(binary_version = ?self.config.binary_version, "binary changed; discarding installed updates");
        let dropped = m.live_hashes().into_iter().map(str::to_string).collect();
        *m = AppMetadata::new();
        return Ok((self.binary_location(), dropped));
      }

      let mut dropped = Vec::new();
      if m.is_first_run && m.launch_attempted {
        warn!(hash = ?m.current_package, "previous launch never confirmed; reverting");
        dropped = state::auto_revert(m);
      } else if m.pending_install.is_some() && m.pending_package.is_some() {
        dropped = state::activate_pending(m);
        m.launch_attempted = true;
      } else if m.is_first_run {
        m.launch_attempted = true;
      }

      Ok((self.current_location(m), dropped))
    })?;

    self.discard(dropped);
    Ok(location)
  }

  /// Whether the current package was staged against a different app binary.
  fn installed_for_other_binary(&self, m: &AppMetadata) -> bool {
    let (Some(binary_version), Some(current)) = (&self.config.binary_version, &m.current_package) else {
      return false;
    };

    match self.store.read_package(current) {
      Ok(Some(package)) => package.binary_version.as_deref() != Some(binary_version.as_str()),
      Ok(None) => false,
      Err(e) => {
        warn!(hash = %current, error = %e, "unreadable package record");
        false
      }
    }
  }

  fn current_location(&self, m: &AppMetadata) -> BundleLocation {
    let Some(hash) = &m.current_package else {
      return self.binary_location();
    };

    match self.package_bundle(hash) {
      Ok(path) => BundleLocation::Package {
        hash: hash.clone(),
        path,
      },
      Err(e) => {
        warn!(hash = %hash, error = %e, "current package unusable; booting binary bundle");
        self.binary_location()
      }
    }
  }

  fn package_bundle(&self, hash: &str) -> Result<PathBuf> {
    let package = self.store.read_package(hash)?.ok_or_else(|| UpdateError::BundleNotFound {
      hash: hash.to_string(),
      bundle: self.store.bundle_file_name().to_string(),
    })?;

    let path = self.store.bundle_path_for(&package);
    if !path.is_file() {
      return Err(UpdateError::BundleNotFound {
        hash: hash.to_string(),
        bundle: package.bundle_path,
      });
    }
    Ok(path)
  }

  fn binary_location(&self) -> BundleLocation {
    BundleLocation::Binary {
      path: self.store.binary_bundle_path(),
    }
  }
}
