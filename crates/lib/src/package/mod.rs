//! Package descriptions.
//!
//! - [`UpdateManifest`]: what the update check returns for an available package
//! - [`LocalPackage`]: the record kept next to a staged package (`app.json`)
//! - [`InstallMode`]: when a staged package becomes the active one

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// Policy governing when a staged package becomes current.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallMode {
  /// Activate now; the host reloads the bundle right away.
  Immediate,
  /// Activate at the next restart of the host process.
  #[default]
  OnNextRestart,
  /// Activate the next time the app returns to the foreground.
  OnNextResume,
}

impl InstallMode {
  pub fn is_deferred(self) -> bool {
    !matches!(self, InstallMode::Immediate)
  }
}

impl std::fmt::Display for InstallMode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      InstallMode::Immediate => "IMMEDIATE",
      InstallMode::OnNextRestart => "ON_NEXT_RESTART",
      InstallMode::OnNextResume => "ON_NEXT_RESUME",
    };
    f.write_str(name)
  }
}

/// Server-provided description of an available update.
///
/// Unknown fields are ignored. `packageHash` and `downloadUrl` are required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManifest {
  pub package_hash: String,

  #[serde(default)]
  pub download_url: String,

  #[serde(default)]
  pub label: Option<String>,

  #[serde(default)]
  pub app_version: Option<String>,

  #[serde(default)]
  pub description: Option<String>,

  #[serde(default)]
  pub is_mandatory: bool,

  #[serde(default)]
  pub package_size: Option<u64>,

  #[serde(default)]
  pub deployment_key: Option<String>,

  /// Present when the artifact is a diff against this local package.
  #[serde(default)]
  pub diff_against_hash: Option<String>,

  #[serde(default)]
  pub install_mode: Option<InstallMode>,
}

impl UpdateManifest {
  /// Parse and validate a manifest received from the update check.
  pub fn from_json(text: &str) -> Result<Self, UpdateError> {
    let manifest: UpdateManifest =
      serde_json::from_str(text).map_err(|e| UpdateError::InvalidManifest(e.to_string()))?;
    manifest.validate()?;
    Ok(manifest)
  }

  /// Check the fields the lifecycle relies on.
  pub fn validate(&self) -> Result<(), UpdateError> {
    validate_hash(&self.package_hash).map_err(|msg| UpdateError::InvalidManifest(format!("packageHash {}", msg)))?;

    if self.download_url.trim().is_empty() {
      return Err(UpdateError::InvalidManifest("downloadUrl is empty".to_string()));
    }

    if let Some(base) = &self.diff_against_hash {
      validate_hash(base).map_err(|msg| UpdateError::InvalidManifest(format!("diffAgainstHash {}", msg)))?;
      if base == &self.package_hash {
        return Err(UpdateError::InvalidManifest(
          "diffAgainstHash equals packageHash".to_string(),
        ));
      }
    }

    Ok(())
  }
}

/// Package hashes name folders, so they must be a single safe path component.
fn validate_hash(hash: &str) -> Result<(), &'static str> {
  if hash.is_empty() {
    return Err("is empty");
  }
  if hash == "." || hash == ".." {
    return Err("is not a valid folder name");
  }
  if !hash.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
    return Err("contains characters outside [A-Za-z0-9_-]");
  }
  Ok(())
}

/// Record kept in `<updates>/<hash>/app.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPackage {
  #[serde(flatten)]
  pub manifest: UpdateManifest,

  /// Entry bundle, relative to the package folder.
  pub bundle_path: String,

  /// Binary version the package was staged against.
  #[serde(default)]
  pub binary_version: Option<String>,
}

impl LocalPackage {
  pub fn hash(&self) -> &str {
    &self.manifest.package_hash
  }

  pub fn label(&self) -> Option<&str> {
    self.manifest.label.as_deref()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const FULL: &str = r#"{
    "packageHash": "abc123",
    "downloadUrl": "https://updates.example.com/abc123.zip",
    "label": "v7",
    "appVersion": "1.0.0",
    "isMandatory": true,
    "deploymentKey": "prod-key",
    "installMode": "ON_NEXT_RESUME",
    "somethingNew": {"ignored": true}
  }"#;

  #[test]
  fn parses_full_manifest_and_ignores_unknown_fields() {
    let manifest = UpdateManifest::from_json(FULL).unwrap();
    assert_eq!(manifest.package_hash, "abc123");
    assert_eq!(manifest.label.as_deref(), Some("v7"));
    assert!(manifest.is_mandatory);
    assert_eq!(manifest.install_mode, Some(InstallMode::OnNextResume));
    assert!(manifest.diff_against_hash.is_none());
  }

  #[test]
  fn missing_hash_is_invalid() {
    let result = UpdateManifest::from_json(r#"{"downloadUrl": "https://x/y.zip"}"#);
    assert!(matches!(result, Err(UpdateError::InvalidManifest(_))));
  }

  #[test]
  fn empty_download_url_is_invalid() {
    let result = UpdateManifest::from_json(r#"{"packageHash": "abc", "downloadUrl": "  "}"#);
    assert!(matches!(result, Err(UpdateError::InvalidManifest(_))));
  }

  #[test]
  fn hash_with_path_separator_is_invalid() {
    let result = UpdateManifest::from_json(r#"{"packageHash": "../etc", "downloadUrl": "https://x"}"#);
    assert!(matches!(result, Err(UpdateError::InvalidManifest(_))));
  }

  #[test]
  fn diff_against_self_is_invalid() {
    let result = UpdateManifest::from_json(
      r#"{"packageHash": "abc", "downloadUrl": "https://x", "diffAgainstHash": "abc"}"#,
    );
    assert!(matches!(result, Err(UpdateError::InvalidManifest(_))));
  }

  #[test]
  fn not_json_is_invalid() {
    assert!(matches!(
      UpdateManifest::from_json("<html>"),
      Err(UpdateError::InvalidManifest(_))
    ));
  }

  #[test]
  fn install_mode_wire_names() {
    assert_eq!(
      serde_json::to_string(&InstallMode::OnNextRestart).unwrap(),
      "\"ON_NEXT_RESTART\""
    );
    assert_eq!(InstallMode::Immediate.to_string(), "IMMEDIATE");
    assert!(InstallMode::OnNextResume.is_deferred());
    assert!(!InstallMode::Immediate.is_deferred());
  }

  #[test]
  fn local_package_flattens_manifest() {
    let local = LocalPackage {
      manifest: UpdateManifest::from_json(FULL).unwrap(),
      bundle_path: "dist/app.jsbundle".to_string(),
      binary_version: Some("1.0.0".to_string()),
    };

    let json: serde_json::Value = serde_json::to_value(&local).unwrap();
    assert_eq!(json["packageHash"], "abc123");
    assert_eq!(json["bundlePath"], "dist/app.jsbundle");

    let back: LocalPackage = serde_json::from_value(json).unwrap();
    assert_eq!(back, local);
  }
}
