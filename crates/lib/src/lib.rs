//! hotload-lib: over-the-air package lifecycle for interpreted app bundles
//!
//! This crate moves an update package from "described by a remote manifest"
//! to "current", and back again when a new package fails to start:
//! - `UpdateManager`: the service object driving staging, installing and rollback
//! - `PackageStore`: content-addressed package folders under `<support>/updates`
//! - `MetadataStore`: the single durable record of current/previous/pending packages
//! - `BundleLocation`: what the host should boot, after automatic crash recovery

pub mod archive;
pub mod config;
pub mod consts;
pub mod diff;
pub mod download;
pub mod error;
pub mod gc;
pub mod install;
pub mod metadata;
pub mod package;
pub mod platform;
pub mod rollback;
pub mod store;
pub mod store_lock;
pub mod util;

pub use config::UpdaterConfig;
pub use error::{Result, UpdateError};
pub use install::{InstallOptions, UpdateManager};
pub use package::{InstallMode, LocalPackage, UpdateManifest};
pub use rollback::BundleLocation;
