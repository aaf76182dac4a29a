//! The package lifecycle service.
//!
//! [`UpdateManager`] owns the content store, the metadata store and the
//! injected [`Fetcher`]. Every metadata change runs through
//! [`MetadataStore::mutate`], so staging, installing, confirming and rolling
//! back never interleave their read-modify-write of the record.
//!
//! ```text
//! stage_package ──► pending ──install_pending(IMMEDIATE)──────────► current
//!                      │                                              ▲
//!                      └──install_pending(deferred)──► restart/resume ┘
//! ```

pub(crate) mod state;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::archive;
use crate::config::UpdaterConfig;
use crate::diff::apply_diff;
use crate::download::{self, DefaultFetcher, DownloadProgress, Fetcher};
use crate::error::{Result, UpdateError};
use crate::gc::{GcResult, collect_garbage};
use crate::metadata::{AppMetadata, MetadataStore, PendingInstall};
use crate::package::{InstallMode, LocalPackage, UpdateManifest};
use crate::store::{PackageStore, TransientKind};
use crate::store_lock::{LockMode, LockTarget, StoreLock};
use crate::util::hash::verify_folder;

/// Options for [`UpdateManager::install_pending_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstallOptions {
  pub mode: InstallMode,
  /// For `OnNextResume`: how long the app must have been in the background.
  pub minimum_background_duration: Duration,
}

impl InstallOptions {
  pub fn new(mode: InstallMode) -> Self {
    Self {
      mode,
      minimum_background_duration: Duration::ZERO,
    }
  }

  pub fn with_minimum_background_duration(mut self, duration: Duration) -> Self {
    self.minimum_background_duration = duration;
    self
  }
}

/// Removes every transient artifact for a hash when staging ends, however it
/// ends, then releases the staging lock.
struct TransientGuard<'a> {
  store: &'a PackageStore,
  hash: &'a str,
  _lock: StoreLock,
}

impl Drop for TransientGuard<'_> {
  fn drop(&mut self) {
    self.store.remove_transient(self.hash);
  }
}

pub struct UpdateManager {
  pub(crate) config: UpdaterConfig,
  pub(crate) store: PackageStore,
  pub(crate) metadata: MetadataStore,
  fetcher: Arc<dyn Fetcher>,
  background_since: Mutex<Option<Instant>>,
}

impl UpdateManager {
  /// Manager that downloads over HTTP(S), or from disk for `file://` URLs.
  pub fn open(config: UpdaterConfig) -> Result<Self> {
    let fetcher = DefaultFetcher::new()?;
    Ok(Self::with_fetcher(config, Arc::new(fetcher)))
  }

  pub fn with_fetcher(config: UpdaterConfig, fetcher: Arc<dyn Fetcher>) -> Self {
    let store = PackageStore::new(&config);
    let metadata = MetadataStore::new(config.updates_dir());
    Self {
      config,
      store,
      metadata,
      fetcher,
      background_since: Mutex::new(None),
    }
  }

  pub fn config(&self) -> &UpdaterConfig {
    &self.config
  }

  pub fn store(&self) -> &PackageStore {
    &self.store
  }

  // ---------------------------------------------------------------------------
  // Staging
  // ---------------------------------------------------------------------------

  /// Download, reconstruct and verify a package, then record it as pending.
  ///
  /// A package that fails the hash check leaves metadata untouched and no
  /// artifacts behind. A previously pending package is discarded.
  pub async fn stage_package(
    &self,
    manifest: &UpdateManifest,
    progress: Option<&UnboundedSender<DownloadProgress>>,
  ) -> Result<LocalPackage> {
    manifest.validate()?;
    let hash = manifest.package_hash.as_str();

    let snapshot = self.metadata.load()?;
    if snapshot.current_package.as_deref() == Some(hash)
      && let Some(existing) = self.store.read_package(hash)?
    {
      info!(hash, "package is already current");
      return Ok(existing);
    }

    let reuse = snapshot.previous_package.as_deref() == Some(hash) && self.store.exists(hash);
    let (package, staged) = if reuse {
      info!(hash, "reusing retained package folder");
      let package = match self.store.read_package(hash)? {
        Some(package) => package,
        None => self.describe(manifest, &self.store.folder_path_for(hash))?,
      };
      (package, None)
    } else {
      // Held until the transients are gone, so a sweep never takes them mid-stage.
      let lock = StoreLock::acquire(self.store.updates_dir(), LockTarget::Staging, LockMode::Shared, "stage")?;
      self.store.remove_transient(hash);
      let guard = TransientGuard {
        store: &self.store,
        hash,
        _lock: lock,
      };

      let staging = self.materialize(manifest, progress).await?;
      verify_folder(&staging, hash)?;
      let package = self.describe(manifest, &staging)?;
      self.store.write_package(&staging, &package)?;
      (package, Some((staging, guard)))
    };

    // The folder lands and becomes pending in one mutation; a sweep never
    // sees it unreferenced.
    let dropped = self.metadata.mutate("stage", |m| -> Result<Vec<String>> {
      if let Some((staging, _)) = &staged {
        if m.references(hash) && self.store.exists(hash) {
          debug!(hash, "live folder already holds this package");
        } else {
          self.store.finalize(staging, hash)?;
        }
      }

      if m.current_package.as_deref() == Some(hash) {
        return Ok(Vec::new());
      }
      let previous_pending = m.pending_package.replace(hash.to_string());
      m.pending_install = None;
      Ok(previous_pending.into_iter().filter(|h| h != hash).collect())
    })?;
    drop(staged);
    self.discard(dropped);

    info!(hash, label = ?package.label(), "package staged");
    Ok(package)
  }

  /// Fetch the artifact and assemble the full package in the staging folder.
  async fn materialize(
    &self,
    manifest: &UpdateManifest,
    progress: Option<&UnboundedSender<DownloadProgress>>,
  ) -> Result<PathBuf> {
    let hash = manifest.package_hash.as_str();
    let artifact = self.store.staging_path_for(hash, TransientKind::Download);
    let staging = self.store.staging_path_for(hash, TransientKind::Staging);

    download::download(self.fetcher.as_ref(), &manifest.download_url, &artifact, progress).await?;
    let is_zip = archive::is_zip(&artifact).map_err(|e| UpdateError::archive(hash, e))?;

    match &manifest.diff_against_hash {
      Some(base_hash) => {
        if !is_zip {
          return Err(UpdateError::InvalidManifest(format!(
            "diff artifact for {} is not a zip archive",
            hash
          )));
        }
        let base = self.diff_base(base_hash)?;
        let diff_dir = self.store.staging_path_for(hash, TransientKind::DiffManifest);
        archive::extract_zip(&artifact, &diff_dir).map_err(|e| UpdateError::archive(hash, e))?;
        apply_diff(&base, &diff_dir, &staging)?;
      }
      None if is_zip => {
        archive::extract_zip(&artifact, &staging).map_err(|e| UpdateError::archive(hash, e))?;
      }
      None => {
        fs::create_dir_all(&staging).map_err(|e| UpdateError::disk(&staging, e))?;
        let bundle = staging.join(self.store.bundle_file_name());
        fs::rename(&artifact, &bundle).map_err(|e| UpdateError::disk(&bundle, e))?;
      }
    }

    Ok(staging)
  }

  /// Folder a diff was built against: a local package, or the binary assets.
  fn diff_base(&self, base_hash: &str) -> Result<PathBuf> {
    if self.store.exists(base_hash) {
      return Ok(self.store.folder_path_for(base_hash));
    }

    if self.config.binary_package_hash.as_deref() == Some(base_hash)
      && let Some(assets) = self.store.binary_assets_path()
      && assets.is_dir()
    {
      return Ok(assets.to_path_buf());
    }

    Err(UpdateError::MissingDiffBase {
      hash: base_hash.to_string(),
    })
  }

  fn describe(&self, manifest: &UpdateManifest, folder: &Path) -> Result<LocalPackage> {
    let bundle_path = self
      .store
      .find_bundle(folder)
      .ok_or_else(|| UpdateError::BundleNotFound {
        hash: manifest.package_hash.clone(),
        bundle: self.store.bundle_file_name().to_string(),
      })?;

    Ok(LocalPackage {
      manifest: manifest.clone(),
      bundle_path,
      binary_version: self.config.binary_version.clone(),
    })
  }

  // ---------------------------------------------------------------------------
  // Installing
  // ---------------------------------------------------------------------------

  pub fn install_pending(&self, mode: InstallMode) -> Result<()> {
    self.install_pending_with(InstallOptions::new(mode))
  }

  /// Activate the pending package now, or record when it should activate.
  pub fn install_pending_with(&self, options: InstallOptions) -> Result<()> {
    let dropped = self.metadata.mutate("install", |m| -> Result<Vec<String>> {
      let pending = m.pending_package.clone().ok_or(UpdateError::NoPendingPackage)?;
      if !self.store.exists(&pending) {
        warn!(hash = %pending, "pending package folder is missing");
        return Err(UpdateError::NoPendingPackage);
      }

      if options.mode.is_deferred() {
        state::defer(
          m,
          PendingInstall {
            mode: options.mode,
            minimum_background_duration_secs: options.minimum_background_duration.as_secs(),
          },
        );
        info!(hash = %pending, mode = %options.mode, "install deferred");
        return Ok(Vec::new());
      }

      let dropped = state::activate_pending(m);
      // The host reloads right away; this activation counts as the boot.
      m.launch_attempted = true;
      Ok(dropped)
    })?;

    self.discard(dropped);
    Ok(())
  }

  // ---------------------------------------------------------------------------
  // Host lifecycle
  // ---------------------------------------------------------------------------

  pub fn on_application_did_enter_background(&self) {
    let mut since = self.background_since.lock().unwrap_or_else(|p| p.into_inner());
    *since = Some(Instant::now());
  }

  /// Activate an `OnNextResume` install if the app stayed in the background
  /// long enough. Returns whether a package was activated.
  pub fn on_application_did_become_active(&self) -> Result<bool> {
    let elapsed = self
      .background_since
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .take()
      .map(|since| since.elapsed())
      .unwrap_or(Duration::ZERO);
    self.resume_after(elapsed)
  }

  /// [`Self::on_application_did_become_active`] with an explicit background duration.
  pub fn resume_after(&self, background: Duration) -> Result<bool> {
    let dropped = self.metadata.mutate("resume", |m| -> Result<Option<Vec<String>>> {
      let Some(install) = m.pending_install else {
        return Ok(None);
      };
      if install.mode != InstallMode::OnNextResume || m.pending_package.is_none() {
        return Ok(None);
      }
      if background.as_secs() < install.minimum_background_duration_secs {
        debug!(
          background_secs = background.as_secs(),
          required_secs = install.minimum_background_duration_secs,
          "resume too early to activate"
        );
        return Ok(None);
      }

      let dropped = state::activate_pending(m);
      m.launch_attempted = true;
      Ok(Some(dropped))
    })?;

    Ok(match dropped {
      Some(dropped) => {
        self.discard(dropped);
        true
      }
      None => false,
    })
  }

  /// Activate any deferred install ahead of a host restart.
  pub fn on_application_will_restart(&self) -> Result<bool> {
    let dropped = self.metadata.mutate("restart", |m| -> Result<Option<Vec<String>>> {
      if m.pending_install.is_none() || m.pending_package.is_none() {
        return Ok(None);
      }
      Ok(Some(state::activate_pending(m)))
    })?;

    Ok(match dropped {
      Some(dropped) => {
        self.discard(dropped);
        true
      }
      None => false,
    })
  }

  /// Confirm that the current package started successfully.
  pub fn notify_application_ready(&self) -> Result<()> {
    self.metadata.mutate("ready", |m| -> Result<()> {
      if m.is_first_run {
        info!(hash = ?m.current_package, "package confirmed");
      }
      state::confirm(m);
      Ok(())
    })
  }

  /// Swap back to the previous package. Returns the new current hash.
  pub fn rollback_package(&self) -> Result<String> {
    let (current, dropped) = self.metadata.mutate("rollback", |m| -> Result<(Option<String>, Vec<String>)> {
      let dropped = state::rollback(m)?;
      Ok((m.current_package.clone(), dropped))
    })?;
    self.discard(dropped);

    let current = current.ok_or(UpdateError::NoPreviousPackage)?;
    info!(hash = %current, "rolled back");
    Ok(current)
  }

  // ---------------------------------------------------------------------------
  // Queries
  // ---------------------------------------------------------------------------

  pub fn metadata(&self) -> Result<AppMetadata> {
    Ok(self.metadata.load()?)
  }

  pub fn package(&self, hash: &str) -> Result<Option<LocalPackage>> {
    self.store.read_package(hash)
  }

  pub fn current_package(&self) -> Result<Option<LocalPackage>> {
    match self.metadata.load()?.current_package {
      Some(hash) => self.store.read_package(&hash),
      None => Ok(None),
    }
  }

  pub fn pending_package(&self) -> Result<Option<LocalPackage>> {
    match self.metadata.load()?.pending_package {
      Some(hash) => self.store.read_package(&hash),
      None => Ok(None),
    }
  }

  pub fn current_bundle_path(&self) -> Result<Option<PathBuf>> {
    Ok(self.current_package()?.map(|package| self.store.bundle_path_for(&package)))
  }

  pub fn is_pending(&self, hash: &str) -> Result<bool> {
    Ok(self.metadata.load()?.pending_package.as_deref() == Some(hash))
  }

  /// Whether `hash` is current and has not confirmed startup yet.
  pub fn is_first_run(&self, hash: &str) -> Result<bool> {
    let m = self.metadata.load()?;
    Ok(m.is_first_run && m.current_package.as_deref() == Some(hash))
  }

  pub fn is_failed_update(&self, hash: &str) -> Result<bool> {
    Ok(self.rollback_count(hash)? > 0)
  }

  pub fn rollback_count(&self, hash: &str) -> Result<u32> {
    Ok(self.metadata.load()?.rollback_count_for(hash))
  }

  /// Whether the host should restart now.
  ///
  /// With `only_if_update_is_pending`, only a recorded deferred install counts.
  pub fn restart_required(&self, only_if_update_is_pending: bool) -> Result<bool> {
    if !only_if_update_is_pending {
      return Ok(true);
    }
    let m = self.metadata.load()?;
    Ok(m.pending_package.is_some() && m.pending_install.is_some())
  }

  // ---------------------------------------------------------------------------
  // Maintenance
  // ---------------------------------------------------------------------------

  /// Forget every update and delete all package folders.
  pub fn clear_updates(&self) -> Result<GcResult> {
    info!(updates_dir = %self.store.updates_dir().display(), "clearing updates");
    self.metadata.mutate("clear", |m| -> Result<GcResult> {
      *m = AppMetadata::new();
      Ok(collect_garbage(&self.store, m, false)?)
    })
  }

  /// Remove unreferenced package folders and leftover transient artifacts.
  pub fn gc(&self, dry_run: bool) -> Result<GcResult> {
    self.metadata.mutate("gc", |m| -> Result<GcResult> {
      Ok(collect_garbage(&self.store, m, dry_run)?)
    })
  }

  /// Delete folders that dropped out of the record.
  ///
  /// Runs after the record is saved and re-checks references under the lock.
  /// Failures are logged; `gc` picks up anything left behind.
  pub(crate) fn discard(&self, hashes: Vec<String>) {
    if hashes.is_empty() {
      return;
    }

    let result = self.metadata.mutate("discard", |m| -> Result<()> {
      for hash in &hashes {
        self.store.delete(hash, m);
      }
      Ok(())
    });

    if let Err(e) = result {
      warn!(error = %e, "failed to discard packages");
    }
  }
}

#[cfg(test)]
mod tests;
