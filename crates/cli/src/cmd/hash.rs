use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::json;

use hotload_lib::consts::HASH_EXCLUDES;
use hotload_lib::util::hash::{hash_file, hash_folder};

use crate::output::{OutputFormat, print_json};

/// Print the package hash of a folder, or the SHA-256 of a single file.
pub fn cmd_hash(path: &Path, output: OutputFormat) -> Result<()> {
  if !path.exists() {
    bail!("No such file or directory: {}", path.display());
  }

  let result = if path.is_dir() {
    hash_folder(path, HASH_EXCLUDES)
  } else {
    hash_file(path)
  };
  let hash = result.with_context(|| format!("Failed to hash {}", path.display()))?;

  if output.is_json() {
    return print_json(&json!({ "path": path, "hash": hash.as_str() }));
  }

  println!("{}", hash.as_str());
  Ok(())
}
