//! Status command implementation.
//!
//! Displays the current, previous and pending packages and update store usage.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use hotload_lib::UpdateManager;
use hotload_lib::gc::dir_size;
use hotload_lib::metadata::PendingInstall;

use crate::output::{
  OutputFormat, format_bytes, format_package, print_info, print_json, print_stat, print_success, print_warning,
  truncate_hash,
};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PackageSummary {
  hash: String,
  label: Option<String>,
  rollback_count: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
  updates_dir: String,
  current: Option<PackageSummary>,
  previous: Option<PackageSummary>,
  pending: Option<PackageSummary>,
  pending_install: Option<PendingInstall>,
  is_first_run: bool,
  awaiting_confirmation: bool,
  failed_updates: BTreeMap<String, u32>,
  store_usage_bytes: u64,
}

pub fn cmd_status(manager: &UpdateManager, verbose: bool, output: OutputFormat) -> Result<()> {
  let metadata = manager.metadata()?;

  let summarize = |hash: &Option<String>| -> Result<Option<PackageSummary>> {
    let Some(hash) = hash else {
      return Ok(None);
    };
    let label = manager.package(hash)?.and_then(|p| p.label().map(str::to_string));
    Ok(Some(PackageSummary {
      hash: hash.clone(),
      label,
      rollback_count: metadata.rollback_count_for(hash),
    }))
  };

  let report = StatusReport {
    updates_dir: manager.store().updates_dir().display().to_string(),
    current: summarize(&metadata.current_package)?,
    previous: summarize(&metadata.previous_package)?,
    pending: summarize(&metadata.pending_package)?,
    pending_install: metadata.pending_install,
    is_first_run: metadata.is_first_run,
    awaiting_confirmation: metadata.is_unconfirmed(),
    failed_updates: metadata.rollback_count.clone(),
    store_usage_bytes: dir_size(manager.store().updates_dir()),
  };

  if output.is_json() {
    return print_json(&report);
  }

  match &report.current {
    Some(current) => print_success(&format!("Current package: {}", describe(current))),
    None => print_info("Running the binary-bundled package"),
  }
  if let Some(previous) = &report.previous {
    print_stat("Previous", &describe(previous));
  }
  if let Some(pending) = &report.pending {
    let when = report
      .pending_install
      .map(|install| install.mode.to_string())
      .unwrap_or_else(|| "not installed".to_string());
    print_stat("Pending", &format!("{} ({})", describe(pending), when));
  }
  if report.awaiting_confirmation {
    print_stat("Awaiting confirmation", "yes");
  }

  if verbose {
    for (hash, count) in &report.failed_updates {
      print_warning(&format!("{} failed to start ({} rollback(s))", truncate_hash(hash), count));
    }
  }

  println!();
  print_stat("Store usage", &format_bytes(report.store_usage_bytes));
  Ok(())
}

fn describe(package: &PackageSummary) -> String {
  format_package(&package.hash, package.label.as_deref())
}
