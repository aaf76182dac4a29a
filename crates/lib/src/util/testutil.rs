//! Test utilities for hotload-lib.
//!
//! An in-memory [`Fetcher`] and helpers for building package artifacts on disk.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use zip::write::SimpleFileOptions;

use crate::download::{DownloadError, FetchResponse, Fetcher};

#[derive(Clone)]
struct Route {
  chunks: Vec<Vec<u8>>,
  total: Option<u64>,
  fail_after: bool,
}

/// Serves canned responses keyed by URL. Unknown URLs answer 404.
#[derive(Default)]
pub struct MemoryFetcher {
  routes: HashMap<String, Route>,
  requests: Mutex<Vec<String>>,
}

impl MemoryFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_body(self, url: &str, body: Vec<u8>) -> Self {
    self.with_chunks(url, vec![body])
  }

  pub fn with_chunks(mut self, url: &str, chunks: Vec<Vec<u8>>) -> Self {
    let total = chunks.iter().map(|c| c.len() as u64).sum();
    let chunks = chunks.into_iter().filter(|c| !c.is_empty()).collect();
    self.routes.insert(
      url.to_string(),
      Route {
        chunks,
        total: Some(total),
        fail_after: false,
      },
    );
    self
  }

  /// Yields `partial`, then a transport error.
  pub fn with_failure_after(mut self, url: &str, partial: Vec<u8>) -> Self {
    self.routes.insert(
      url.to_string(),
      Route {
        chunks: vec![partial],
        total: None,
        fail_after: true,
      },
    );
    self
  }

  /// Announces `len` bytes but sends `body`.
  pub fn with_announced_len(mut self, url: &str, body: Vec<u8>, len: u64) -> Self {
    self.routes.insert(
      url.to_string(),
      Route {
        chunks: vec![body],
        total: Some(len),
        fail_after: false,
      },
    );
    self
  }

  pub fn requests(&self) -> Vec<String> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
  async fn fetch(&self, url: &str) -> Result<FetchResponse, DownloadError> {
    self.requests.lock().unwrap().push(url.to_string());

    let route = self.routes.get(url).cloned().ok_or_else(|| DownloadError::HttpStatus {
      status: 404,
      url: url.to_string(),
    })?;

    let mut items: Vec<Result<Bytes, DownloadError>> = route.chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
    if route.fail_after {
      items.push(Err(DownloadError::Http("connection reset".to_string())));
    }

    Ok(FetchResponse {
      total: route.total,
      stream: Box::pin(futures::stream::iter(items)),
    })
  }
}

/// Write a zip archive with the given `(name, contents)` entries.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
  let file = File::create(path).unwrap();
  let mut writer = zip::ZipWriter::new(file);
  let options = SimpleFileOptions::default();

  for (name, contents) in entries {
    writer.start_file(*name, options).unwrap();
    writer.write_all(contents).unwrap();
  }

  writer.finish().unwrap();
}

/// Zip bytes for the given entries.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
  let temp = tempfile::NamedTempFile::new().unwrap();
  write_zip(temp.path(), entries);
  fs::read(temp.path()).unwrap()
}

/// Materialize `(relpath, contents)` entries under `root`.
pub fn write_tree(root: &Path, entries: &[(&str, &[u8])]) {
  for (rel, contents) in entries {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
  }
  fs::create_dir_all(root).unwrap();
}

/// A package built from `files`: its folder hash and a zip artifact.
pub struct PackageFixture {
  pub hash: String,
  pub zip: Vec<u8>,
}

impl PackageFixture {
  pub fn new(files: &[(&str, &[u8])]) -> Self {
    let temp = tempfile::TempDir::new().unwrap();
    write_tree(temp.path(), files);
    let hash = crate::util::hash::hash_folder(temp.path(), crate::consts::HASH_EXCLUDES).unwrap();
    Self {
      hash: hash.0,
      zip: zip_bytes(files),
    }
  }
}
