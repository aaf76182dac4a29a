//! Names shared across the crate.

pub const APP_NAME: &str = "hotload";

/// Directory under the support directory that holds every package.
pub const UPDATES_DIR: &str = "updates";

/// Durable `AppMetadata` record inside the updates directory.
pub const METADATA_FILENAME: &str = "metadata.json";

/// Per-package record written next to the package contents.
pub const PACKAGE_FILENAME: &str = "app.json";

/// Diff manifest carried inside a diff artifact.
pub const DIFF_MANIFEST_FILENAME: &str = "hotload.json";

/// Entry bundle name used when the host does not configure one.
pub const DEFAULT_BUNDLE_FILENAME: &str = "app.jsbundle";

/// Environment variable overriding the support directory.
pub const ROOT_ENV_VAR: &str = "HOTLOAD_ROOT";

/// Top-level names that never take part in a package hash.
pub const HASH_EXCLUDES: &[&str] = &[PACKAGE_FILENAME];
