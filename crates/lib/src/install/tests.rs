use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use super::*;
use crate::consts::HASH_EXCLUDES;
use crate::util::hash::hash_folder;
use crate::util::testutil::{MemoryFetcher, PackageFixture, write_tree, zip_bytes};

const BASE_URL: &str = "https://updates.test";

struct Harness {
  temp: TempDir,
  manager: UpdateManager,
}

fn url_for(hash: &str) -> String {
  format!("{}/{}", BASE_URL, hash)
}

fn manifest(hash: &str) -> UpdateManifest {
  UpdateManifest::from_json(&format!(r#"{{"packageHash": "{}", "downloadUrl": "{}"}}"#, hash, url_for(hash))).unwrap()
}

fn v1() -> PackageFixture {
  PackageFixture::new(&[
    ("app.jsbundle", b"bundle v1".as_slice()),
    ("assets/logo.png", b"logo".as_slice()),
    ("assets/old.png", b"old".as_slice()),
  ])
}

fn v2() -> PackageFixture {
  PackageFixture::new(&[
    ("app.jsbundle", b"bundle v2".as_slice()),
    ("assets/logo.png", b"logo".as_slice()),
    ("assets/new.png", b"new".as_slice()),
  ])
}

fn harness_with(fetcher: MemoryFetcher) -> Harness {
  let temp = TempDir::new().unwrap();
  let assets = temp.path().join("binary");
  write_tree(&assets, &[("app.jsbundle", b"binary bundle".as_slice())]);

  let config = UpdaterConfig::new(temp.path().join("support"))
    .with_binary_assets(&assets)
    .with_binary_version("1.0.0");
  Harness {
    manager: UpdateManager::with_fetcher(config, Arc::new(fetcher)),
    temp,
  }
}

fn harness(fixtures: &[&PackageFixture]) -> Harness {
  let mut fetcher = MemoryFetcher::new();
  for fx in fixtures {
    fetcher = fetcher.with_body(&url_for(&fx.hash), fx.zip.clone());
  }
  harness_with(fetcher)
}

fn leftover_transient(h: &Harness) -> Vec<String> {
  let Ok(entries) = fs::read_dir(h.manager.store().updates_dir()) else {
    return Vec::new();
  };
  entries
    .flatten()
    .map(|e| e.file_name().to_string_lossy().into_owned())
    .filter(|name| name.contains('.') && name != "metadata.json" && !name.ends_with(".lock"))
    .collect()
}

#[tokio::test]
async fn staged_then_immediate_install_is_current() {
  let fx = v1();
  let h = harness(&[&fx]);

  let staged = h.manager.stage_package(&manifest(&fx.hash), None).await.unwrap();
  assert!(h.manager.is_pending(&fx.hash).unwrap());

  h.manager.install_pending(InstallMode::Immediate).unwrap();

  let current = h.manager.current_package().unwrap().unwrap();
  assert_eq!(current.hash(), staged.hash());
  assert_eq!(current.bundle_path, "app.jsbundle");
  assert_eq!(current.binary_version.as_deref(), Some("1.0.0"));
  assert!(h.manager.pending_package().unwrap().is_none());
  assert!(h.manager.is_first_run(&fx.hash).unwrap());
  assert_eq!(
    fs::read_to_string(h.manager.current_bundle_path().unwrap().unwrap()).unwrap(),
    "bundle v1"
  );
  assert!(leftover_transient(&h).is_empty());
}

#[tokio::test]
async fn staging_reports_progress() {
  let fx = v1();
  let h = harness(&[&fx]);
  let (tx, mut rx) = mpsc::unbounded_channel();

  h.manager.stage_package(&manifest(&fx.hash), Some(&tx)).await.unwrap();
  drop(tx);

  let mut last = None;
  while let Some(event) = rx.recv().await {
    last = Some(event);
  }
  let last = last.unwrap();
  assert_eq!(last.total_bytes, Some(fx.zip.len() as u64));
  assert_eq!(last.received_bytes, fx.zip.len() as u64);
}

#[tokio::test]
async fn raw_bundle_artifact_becomes_package() {
  let temp = TempDir::new().unwrap();
  write_tree(temp.path(), &[("app.jsbundle", b"console.log('raw')".as_slice())]);
  let hash = hash_folder(temp.path(), HASH_EXCLUDES).unwrap().0;

  let h = harness_with(MemoryFetcher::new().with_body(&url_for(&hash), b"console.log('raw')".to_vec()));
  let staged = h.manager.stage_package(&manifest(&hash), None).await.unwrap();

  assert_eq!(staged.bundle_path, "app.jsbundle");
  assert!(h.manager.store().folder_path_for(&hash).join("app.jsbundle").is_file());
}

#[tokio::test]
async fn diff_reconstructs_full_package() {
  let (base, full) = (v1(), v2());
  let diff_zip = zip_bytes(&[
    ("app.jsbundle", b"bundle v2".as_slice()),
    ("assets/new.png", b"new".as_slice()),
    ("hotload.json", br#"{"deletedFiles": ["assets/old.png"]}"#.as_slice()),
  ]);

  let h = harness_with(
    MemoryFetcher::new()
      .with_body(&url_for(&base.hash), base.zip.clone())
      .with_body(&url_for(&full.hash), diff_zip),
  );

  h.manager.stage_package(&manifest(&base.hash), None).await.unwrap();
  h.manager.install_pending(InstallMode::Immediate).unwrap();
  h.manager.notify_application_ready().unwrap();

  let mut diff_manifest = manifest(&full.hash);
  diff_manifest.diff_against_hash = Some(base.hash.clone());
  h.manager.stage_package(&diff_manifest, None).await.unwrap();

  let folder = h.manager.store().folder_path_for(&full.hash);
  assert_eq!(hash_folder(&folder, HASH_EXCLUDES).unwrap().0, full.hash);
  assert!(!folder.join("assets/old.png").exists());
  assert!(!folder.join("hotload.json").exists());
  assert!(leftover_transient(&h).is_empty());
}

#[tokio::test]
async fn diff_against_binary_package() {
  let full = PackageFixture::new(&[("app.jsbundle", b"bundle v2".as_slice())]);
  let diff_zip = zip_bytes(&[
    ("app.jsbundle", b"bundle v2".as_slice()),
    ("hotload.json", br#"{"deletedFiles": []}"#.as_slice()),
  ]);
  let h = harness(&[]);
  let manager = UpdateManager::with_fetcher(
    h.manager.config().clone().with_binary_package_hash("binaryhash"),
    Arc::new(MemoryFetcher::new().with_body(&url_for(&full.hash), diff_zip)),
  );

  let mut diff_manifest = manifest(&full.hash);
  diff_manifest.diff_against_hash = Some("binaryhash".to_string());
  manager.stage_package(&diff_manifest, None).await.unwrap();

  assert!(manager.store().exists(&full.hash));
  // Package zero is read, never modified.
  assert_eq!(
    fs::read_to_string(h.temp.path().join("binary").join("app.jsbundle")).unwrap(),
    "binary bundle"
  );
}

#[tokio::test]
async fn diff_without_local_base_fails() {
  let full = v2();
  let diff_zip = zip_bytes(&[("hotload.json", br#"{"deletedFiles": []}"#.as_slice())]);
  let h = harness_with(MemoryFetcher::new().with_body(&url_for(&full.hash), diff_zip));

  let mut diff_manifest = manifest(&full.hash);
  diff_manifest.diff_against_hash = Some("gonebase".to_string());
  let result = h.manager.stage_package(&diff_manifest, None).await;

  match result {
    Err(UpdateError::MissingDiffBase { hash }) => assert_eq!(hash, "gonebase"),
    other => panic!("expected MissingDiffBase, got {:?}", other),
  }
  assert!(h.manager.metadata().unwrap().pending_package.is_none());
  assert!(leftover_transient(&h).is_empty());
}

#[tokio::test]
async fn hash_mismatch_never_installs() {
  let (good, tampered) = (v1(), v2());
  let h = harness_with(
    MemoryFetcher::new()
      .with_body(&url_for(&good.hash), good.zip.clone())
      // Serves v2's bytes under v1's advertised hash.
      .with_body(&url_for("claimedhash"), tampered.zip.clone()),
  );

  h.manager.stage_package(&manifest(&good.hash), None).await.unwrap();
  h.manager.install_pending(InstallMode::Immediate).unwrap();
  let before = h.manager.metadata().unwrap();

  let result = h.manager.stage_package(&manifest("claimedhash"), None).await;

  match result {
    Err(UpdateError::HashMismatch { expected, actual }) => {
      assert_eq!(expected, "claimedhash");
      assert_eq!(actual, tampered.hash);
    }
    other => panic!("expected HashMismatch, got {:?}", other),
  }
  let after = h.manager.metadata().unwrap();
  assert_eq!(after.current_package, before.current_package);
  assert_eq!(after.pending_package, before.pending_package);
  assert!(!h.manager.store().exists("claimedhash"));
  assert!(leftover_transient(&h).is_empty());
}

#[tokio::test]
async fn truncated_archive_is_rejected_as_invalid() {
  let fx = v1();
  let truncated = fx.zip[..fx.zip.len() / 2].to_vec();
  let h = harness_with(MemoryFetcher::new().with_body(&url_for(&fx.hash), truncated));

  let err = h.manager.stage_package(&manifest(&fx.hash), None).await.unwrap_err();

  assert!(matches!(err, UpdateError::InvalidManifest(ref message) if message.contains(&fx.hash)));
  assert!(!err.is_retryable());
  assert!(h.manager.metadata().unwrap().pending_package.is_none());
  assert!(leftover_transient(&h).is_empty());
}

#[tokio::test]
async fn download_failure_is_retryable_and_clean() {
  let h = harness_with(MemoryFetcher::new().with_failure_after(&url_for("abc"), b"partial".to_vec()));

  let err = h.manager.stage_package(&manifest("abc"), None).await.unwrap_err();

  assert!(err.is_retryable());
  assert!(leftover_transient(&h).is_empty());
  assert_eq!(h.manager.metadata().unwrap(), AppMetadata::new());
}

#[tokio::test]
async fn artifact_without_bundle_is_rejected() {
  let fx = PackageFixture::new(&[("index.android.bundle", b"x".as_slice())]);
  let h = harness(&[&fx]);

  let result = h.manager.stage_package(&manifest(&fx.hash), None).await;

  assert!(matches!(result, Err(UpdateError::BundleNotFound { .. })));
  assert!(!h.manager.store().exists(&fx.hash));
}

#[tokio::test]
async fn restaging_replaces_unactivated_pending() {
  let (a, b) = (v1(), v2());
  let h = harness(&[&a, &b]);

  h.manager.stage_package(&manifest(&a.hash), None).await.unwrap();
  h.manager.stage_package(&manifest(&b.hash), None).await.unwrap();

  assert_eq!(h.manager.metadata().unwrap().pending_package.as_deref(), Some(b.hash.as_str()));
  assert!(!h.manager.store().exists(&a.hash));
}

#[tokio::test]
async fn staging_current_package_is_a_noop() {
  let fx = v1();
  let h = harness(&[&fx]);

  h.manager.stage_package(&manifest(&fx.hash), None).await.unwrap();
  h.manager.install_pending(InstallMode::Immediate).unwrap();
  let before = h.manager.metadata().unwrap();

  h.manager.stage_package(&manifest(&fx.hash), None).await.unwrap();

  assert_eq!(h.manager.metadata().unwrap(), before);
}

#[tokio::test]
async fn install_without_pending_fails() {
  let h = harness(&[]);
  assert!(matches!(
    h.manager.install_pending(InstallMode::Immediate),
    Err(UpdateError::NoPendingPackage)
  ));
}

#[tokio::test]
async fn on_next_restart_defers_until_restart() {
  let fx = v1();
  let h = harness(&[&fx]);

  h.manager.stage_package(&manifest(&fx.hash), None).await.unwrap();
  h.manager.install_pending(InstallMode::OnNextRestart).unwrap();

  let m = h.manager.metadata().unwrap();
  assert!(m.current_package.is_none());
  assert!(h.manager.restart_required(true).unwrap());
  // Resume does not activate a restart install.
  assert!(!h.manager.resume_after(Duration::from_secs(3600)).unwrap());

  assert!(h.manager.on_application_will_restart().unwrap());
  assert_eq!(h.manager.metadata().unwrap().current_package.as_deref(), Some(fx.hash.as_str()));
  assert!(!h.manager.restart_required(true).unwrap());
  assert!(h.manager.restart_required(false).unwrap());
}

#[tokio::test]
async fn on_next_resume_honors_minimum_background_duration() {
  let fx = v1();
  let h = harness(&[&fx]);

  h.manager.stage_package(&manifest(&fx.hash), None).await.unwrap();
  h.manager
    .install_pending_with(
      InstallOptions::new(InstallMode::OnNextResume).with_minimum_background_duration(Duration::from_secs(60)),
    )
    .unwrap();

  assert!(!h.manager.resume_after(Duration::from_secs(5)).unwrap());
  assert!(h.manager.metadata().unwrap().current_package.is_none());

  assert!(h.manager.resume_after(Duration::from_secs(61)).unwrap());
  assert_eq!(h.manager.metadata().unwrap().current_package.as_deref(), Some(fx.hash.as_str()));
}

#[tokio::test]
async fn on_next_resume_with_no_minimum_activates_on_first_resume() {
  let fx = v1();
  let h = harness(&[&fx]);

  h.manager.stage_package(&manifest(&fx.hash), None).await.unwrap();
  h.manager.install_pending(InstallMode::OnNextResume).unwrap();

  h.manager.on_application_did_enter_background();
  assert!(h.manager.on_application_did_become_active().unwrap());
  assert!(h.manager.is_first_run(&fx.hash).unwrap());
}

#[tokio::test]
async fn rollback_without_previous_leaves_metadata_unmodified() {
  let fx = v1();
  let h = harness(&[&fx]);
  h.manager.stage_package(&manifest(&fx.hash), None).await.unwrap();
  h.manager.install_pending(InstallMode::Immediate).unwrap();

  let metadata_path = h.manager.store().updates_dir().join("metadata.json");
  let before = fs::read(&metadata_path).unwrap();

  assert!(matches!(h.manager.rollback_package(), Err(UpdateError::NoPreviousPackage)));
  assert_eq!(fs::read(&metadata_path).unwrap(), before);
}

#[tokio::test]
async fn explicit_rollback_swaps_packages() {
  let (a, b) = (v1(), v2());
  let h = harness(&[&a, &b]);

  h.manager.stage_package(&manifest(&a.hash), None).await.unwrap();
  h.manager.install_pending(InstallMode::Immediate).unwrap();
  h.manager.notify_application_ready().unwrap();
  h.manager.stage_package(&manifest(&b.hash), None).await.unwrap();
  h.manager.install_pending(InstallMode::Immediate).unwrap();

  assert_eq!(h.manager.rollback_package().unwrap(), a.hash);

  let m = h.manager.metadata().unwrap();
  assert_eq!(m.current_package.as_deref(), Some(a.hash.as_str()));
  assert_eq!(m.previous_package.as_deref(), Some(b.hash.as_str()));
  assert_eq!(m.rollback_count_for(&b.hash), 1);
}

#[tokio::test]
async fn crash_recovery_reverts_unconfirmed_install() {
  let (h1, h2) = (v1(), v2());
  let h = harness(&[&h1, &h2]);

  h.manager.stage_package(&manifest(&h1.hash), None).await.unwrap();
  h.manager.install_pending(InstallMode::Immediate).unwrap();
  h.manager.notify_application_ready().unwrap();

  h.manager.stage_package(&manifest(&h2.hash), None).await.unwrap();
  h.manager.install_pending(InstallMode::Immediate).unwrap();

  let location = h.manager.resolve_bundle_url().unwrap();

  assert_eq!(location.hash(), Some(h1.hash.as_str()));
  assert_eq!(h.manager.rollback_count(&h2.hash).unwrap(), 1);
}

#[tokio::test]
async fn install_over_unconfirmed_discards_it() {
  let (a, b) = (v1(), v2());
  let c = PackageFixture::new(&[("app.jsbundle", b"bundle v3".as_slice())]);
  let h = harness(&[&a, &b, &c]);

  h.manager.stage_package(&manifest(&a.hash), None).await.unwrap();
  h.manager.install_pending(InstallMode::Immediate).unwrap();
  h.manager.notify_application_ready().unwrap();
  h.manager.stage_package(&manifest(&b.hash), None).await.unwrap();
  h.manager.install_pending(InstallMode::Immediate).unwrap();
  h.manager.stage_package(&manifest(&c.hash), None).await.unwrap();
  h.manager.install_pending(InstallMode::Immediate).unwrap();

  let m = h.manager.metadata().unwrap();
  assert_eq!(m.current_package.as_deref(), Some(c.hash.as_str()));
  assert_eq!(m.previous_package.as_deref(), Some(a.hash.as_str()));
  assert!(!h.manager.store().exists(&b.hash));
  assert!(h.manager.store().exists(&a.hash));
}

#[tokio::test]
async fn superseded_previous_is_deleted() {
  let (a, b) = (v1(), v2());
  let c = PackageFixture::new(&[("app.jsbundle", b"bundle v3".as_slice())]);
  let h = harness(&[&a, &b, &c]);

  for fx in [&a, &b, &c] {
    h.manager.stage_package(&manifest(&fx.hash), None).await.unwrap();
    h.manager.install_pending(InstallMode::Immediate).unwrap();
    h.manager.notify_application_ready().unwrap();
  }

  assert_eq!(h.manager.store().package_hashes().unwrap().len(), 2);
  assert!(!h.manager.store().exists(&a.hash));
}

#[tokio::test]
async fn clear_updates_removes_everything() {
  let fx = v1();
  let h = harness(&[&fx]);
  h.manager.stage_package(&manifest(&fx.hash), None).await.unwrap();
  h.manager.install_pending(InstallMode::Immediate).unwrap();

  let result = h.manager.clear_updates().unwrap();

  assert_eq!(result.stats.packages_deleted, 1);
  assert_eq!(h.manager.metadata().unwrap(), AppMetadata::new());
  assert!(h.manager.store().package_hashes().unwrap().is_empty());
  assert!(h.temp.path().join("binary").join("app.jsbundle").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_stage_and_rollback_serialize() {
  let (a, b, c) = (
    v1(),
    v2(),
    PackageFixture::new(&[("app.jsbundle", b"bundle v3".as_slice())]),
  );
  let h = harness(&[&a, &b, &c]);

  for fx in [&a, &b] {
    h.manager.stage_package(&manifest(&fx.hash), None).await.unwrap();
    h.manager.install_pending(InstallMode::Immediate).unwrap();
    h.manager.notify_application_ready().unwrap();
  }

  let manager = Arc::new(h.manager);
  let stager = {
    let manager = Arc::clone(&manager);
    let hash = c.hash.clone();
    tokio::spawn(async move { manager.stage_package(&manifest(&hash), None).await.map(|_| ()) })
  };
  let roller = {
    let manager = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || manager.rollback_package().map(|_| ()))
  };

  stager.await.unwrap().unwrap();
  roller.await.unwrap().unwrap();

  // The record always parses and matches one of the two serial orders.
  let m = manager.metadata().unwrap();
  assert_eq!(m.current_package.as_deref(), Some(a.hash.as_str()));
  assert_eq!(m.previous_package.as_deref(), Some(b.hash.as_str()));
  assert_eq!(m.rollback_count_for(&b.hash), 1);

  let stage_first = m.pending_package.is_none();
  let rollback_first = m.pending_package.as_deref() == Some(c.hash.as_str());
  assert!(stage_first || rollback_first);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gc_during_stage_keeps_staged_package() {
  let (a, b) = (v1(), v2());
  let h = harness(&[&a, &b]);
  let manager = Arc::new(h.manager);
  let done = Arc::new(AtomicBool::new(false));

  let sweeper = {
    let manager = Arc::clone(&manager);
    let done = Arc::clone(&done);
    std::thread::spawn(move || {
      let mut sweeps = 0;
      loop {
        manager.gc(false).unwrap();
        sweeps += 1;
        if done.load(Ordering::SeqCst) {
          return sweeps;
        }
      }
    })
  };

  for _ in 0..20 {
    for fx in [&a, &b] {
      let package = manager.stage_package(&manifest(&fx.hash), None).await.unwrap();
      assert!(manager.store().bundle_path_for(&package).is_file());
      assert_eq!(manager.metadata().unwrap().pending_package.as_deref(), Some(fx.hash.as_str()));
    }
  }

  done.store(true, Ordering::SeqCst);
  assert!(sweeper.join().unwrap() > 0);

  let result = manager.gc(false).unwrap();
  assert!(!result.staging_in_progress);
  assert!(manager.store().exists(&b.hash));
  assert!(!manager.store().exists(&a.hash));
}
