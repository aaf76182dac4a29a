//! Host lifecycle signals: ready, resume, restart, resolve and rollback.
//!
//! These mirror the calls a host app makes at startup and on foreground
//! transitions, so an operator can drive the same state machine by hand.

use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use hotload_lib::{BundleLocation, UpdateManager};

use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success, truncate_hash};

pub fn cmd_ready(manager: &UpdateManager) -> Result<()> {
  manager.notify_application_ready()?;
  print_success("Current package confirmed");
  Ok(())
}

pub fn cmd_rollback(manager: &UpdateManager, output: OutputFormat) -> Result<()> {
  let current = manager.rollback_package()?;

  if output.is_json() {
    return print_json(&json!({ "currentPackage": current }));
  }

  print_success(&format!("Rolled back to {}", truncate_hash(&current)));
  Ok(())
}

/// Run the startup check and print where the host should boot from.
pub fn cmd_resolve(manager: &UpdateManager, output: OutputFormat) -> Result<()> {
  let location = manager.resolve_bundle_url()?;

  if output.is_json() {
    return print_json(&location);
  }

  match &location {
    BundleLocation::Package { hash, path } => {
      print_info(&format!("Boot package {}", truncate_hash(hash)));
      print_stat("Bundle", &path.display().to_string());
    }
    BundleLocation::Binary { path } => {
      print_info("Boot the binary-bundled package");
      if let Some(path) = path {
        print_stat("Bundle", &path.display().to_string());
      }
    }
  }
  Ok(())
}

/// Signal a return to the foreground.
///
/// Without `--background` the app is treated as having just been backgrounded,
/// so a minimum background duration is not met.
pub fn cmd_resume(manager: &UpdateManager, background: Option<Duration>, output: OutputFormat) -> Result<()> {
  let activated = manager.resume_after(background.unwrap_or(Duration::ZERO))?;
  report_activation(manager, activated, output)
}

pub fn cmd_restart(manager: &UpdateManager, only_if_pending: bool, output: OutputFormat) -> Result<()> {
  if !manager.restart_required(only_if_pending)? {
    if output.is_json() {
      return print_json(&json!({ "activated": false, "currentPackage": manager.metadata()?.current_package }));
    }
    print_info("No install is waiting; nothing to do");
    return Ok(());
  }

  let activated = manager.on_application_will_restart()?;
  report_activation(manager, activated, output)
}

fn report_activation(manager: &UpdateManager, activated: bool, output: OutputFormat) -> Result<()> {
  let current = manager.metadata()?.current_package;

  if output.is_json() {
    return print_json(&json!({ "activated": activated, "currentPackage": current }));
  }

  match (activated, current) {
    (true, Some(hash)) => print_success(&format!("Activated package {}", truncate_hash(&hash))),
    _ => print_info("No package activated"),
  }
  Ok(())
}
