//! Pure transitions over [`AppMetadata`].
//!
//! Each function edits the record in place and returns the hashes that fell
//! out of {current, previous, pending}; the caller deletes those folders after
//! the record is saved.

use tracing::{info, warn};

use crate::error::UpdateError;
use crate::metadata::{AppMetadata, PendingInstall};

/// Make the pending package current.
///
/// A confirmed current package becomes the rollback target. An unconfirmed one
/// is dropped and the existing rollback target stays in place.
pub(crate) fn activate_pending(m: &mut AppMetadata) -> Vec<String> {
  let Some(next) = m.pending_package.take() else {
    return Vec::new();
  };
  m.pending_install = None;

  let mut dropped = Vec::new();
  if let Some(old) = m.current_package.take() {
    if m.is_first_run {
      warn!(hash = %old, "replacing a package that never confirmed startup");
      dropped.push(old);
    } else if let Some(prev) = m.previous_package.replace(old) {
      dropped.push(prev);
    }
  }

  info!(hash = %next, "package activated");
  m.current_package = Some(next);
  m.is_first_run = true;
  m.launch_attempted = false;

  retain_unreferenced(m, dropped)
}

/// Record a deferred activation.
pub(crate) fn defer(m: &mut AppMetadata, install: PendingInstall) {
  m.pending_install = Some(install);
}

/// Swap current and previous, counting a failure against the old current.
///
/// Fails with [`UpdateError::NoPreviousPackage`] without touching `m`.
pub(crate) fn rollback(m: &mut AppMetadata) -> Result<Vec<String>, UpdateError> {
  let prev = m.previous_package.take().ok_or(UpdateError::NoPreviousPackage)?;
  let failed = m.current_package.replace(prev);

  if let Some(failed) = &failed {
    *m.rollback_count.entry(failed.clone()).or_insert(0) += 1;
  }
  m.previous_package = failed;

  let mut dropped = Vec::new();
  dropped.extend(m.pending_package.take());
  m.pending_install = None;
  m.is_first_run = false;
  m.launch_attempted = false;

  Ok(retain_unreferenced(m, dropped))
}

/// Revert an unconfirmed boot.
///
/// With a previous package this is [`rollback`]. Without one the binary bundle
/// takes over: the failed package is counted and dropped.
pub(crate) fn auto_revert(m: &mut AppMetadata) -> Vec<String> {
  if m.previous_package.is_some() {
    // Checked above, so rollback cannot fail.
    return rollback(m).unwrap_or_default();
  }

  let mut dropped = Vec::new();
  if let Some(failed) = m.current_package.take() {
    *m.rollback_count.entry(failed.clone()).or_insert(0) += 1;
    dropped.push(failed);
  }
  dropped.extend(m.pending_package.take());
  m.pending_install = None;
  m.is_first_run = false;
  m.launch_attempted = false;

  retain_unreferenced(m, dropped)
}

/// Confirm the current package.
pub(crate) fn confirm(m: &mut AppMetadata) {
  if let Some(current) = &m.current_package {
    m.rollback_count.remove(current);
  }
  m.is_first_run = false;
  m.launch_attempted = false;
}

fn retain_unreferenced(m: &AppMetadata, mut hashes: Vec<String>) -> Vec<String> {
  hashes.retain(|hash| !m.references(hash));
  hashes.dedup();
  hashes
}
