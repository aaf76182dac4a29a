//! Implementation of the `hotload stage` command.
//!
//! Reads an update manifest from disk and stages the package it describes.
//! `file://` download URLs are read from the local filesystem.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::mpsc;

use hotload_lib::UpdateManifest;
use hotload_lib::UpdateManager;

use crate::output::{OutputFormat, format_bytes, format_duration, format_package, print_json, print_stat, print_success};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StageReport {
  package_hash: String,
  label: Option<String>,
  bundle_path: String,
  downloaded_bytes: u64,
}

pub fn cmd_stage(manager: &UpdateManager, manifest_path: &Path, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  let text = std::fs::read_to_string(manifest_path)
    .with_context(|| format!("Failed to read manifest: {}", manifest_path.display()))?;
  let manifest = UpdateManifest::from_json(&text)?;

  let (tx, mut rx) = mpsc::unbounded_channel();
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let package = rt
    .block_on(manager.stage_package(&manifest, Some(&tx)))
    .context("Staging failed")?;
  drop(tx);

  let mut downloaded_bytes = 0;
  while let Ok(event) = rx.try_recv() {
    downloaded_bytes = event.received_bytes;
  }

  let report = StageReport {
    package_hash: package.hash().to_string(),
    label: package.label().map(str::to_string),
    bundle_path: package.bundle_path.clone(),
    downloaded_bytes,
  };

  if output.is_json() {
    return print_json(&report);
  }

  print_success(&format!(
    "Staged package {}",
    format_package(&report.package_hash, report.label.as_deref())
  ));
  print_stat("Bundle", &report.bundle_path);
  print_stat("Downloaded", &format_bytes(report.downloaded_bytes));
  print_stat("Duration", &format_duration(start.elapsed()));
  Ok(())
}
