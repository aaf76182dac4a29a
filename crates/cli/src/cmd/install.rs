use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use hotload_lib::{InstallMode, InstallOptions, UpdateManager};

use crate::output::{OutputFormat, print_info, print_json, print_success, truncate_hash};

pub fn cmd_install(
  manager: &UpdateManager,
  mode: InstallMode,
  min_background: Option<Duration>,
  output: OutputFormat,
) -> Result<()> {
  let pending = manager.metadata()?.pending_package;

  let mut options = InstallOptions::new(mode);
  if let Some(duration) = min_background {
    options = options.with_minimum_background_duration(duration);
  }
  manager.install_pending_with(options)?;

  if output.is_json() {
    return print_json(&json!({
      "packageHash": pending,
      "installMode": mode,
    }));
  }

  let hash = pending.as_deref().map(truncate_hash).unwrap_or("?");
  match mode {
    InstallMode::Immediate => print_success(&format!("Package {} is now current", hash)),
    InstallMode::OnNextRestart => print_info(&format!("Package {} activates on the next restart", hash)),
    InstallMode::OnNextResume => print_info(&format!("Package {} activates on the next resume", hash)),
  }
  Ok(())
}
