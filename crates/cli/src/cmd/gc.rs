use std::time::Instant;

use anyhow::{Context, Result};

use hotload_lib::UpdateManager;
use hotload_lib::gc::GcResult;

use crate::output::{
  OutputFormat, format_bytes, format_duration, print_info, print_json, print_stat, print_success,
};
use crate::prompts::confirm;

pub fn cmd_gc(manager: &UpdateManager, dry_run: bool, output: OutputFormat) -> Result<()> {
  let start = Instant::now();

  let result = manager.gc(dry_run).context("Garbage collection failed")?;

  if output.is_json() {
    return print_json(&result);
  }

  println!();
  if dry_run {
    print_info("Dry run - no changes made");
  } else {
    print_success("Garbage collection complete!");
  }
  print_summary(&result);
  print_stat("Duration", &format_duration(start.elapsed()));
  Ok(())
}

pub fn cmd_clear(manager: &UpdateManager, force: bool, output: OutputFormat) -> Result<()> {
  let updates_dir = manager.store().updates_dir().display().to_string();
  if !confirm(&format!("Delete every downloaded update under {}?", updates_dir), force)? {
    print_info("Aborted");
    return Ok(());
  }

  let result = manager.clear_updates().context("Failed to clear updates")?;

  if output.is_json() {
    return print_json(&result);
  }

  print_success("All updates cleared; the binary-bundled package is current");
  print_summary(&result);
  Ok(())
}

fn print_summary(result: &GcResult) {
  print_stat("Packages removed", &result.stats.packages_deleted.to_string());
  print_stat("Leftovers removed", &result.stats.transient_deleted.to_string());
  print_stat("Space freed", &format_bytes(result.stats.total_bytes_freed()));
  if result.staging_in_progress {
    print_info("A download is in progress; its files were left in place");
  }
}
