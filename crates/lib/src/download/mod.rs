//! Byte transport for package artifacts.
//!
//! The downloader knows nothing about hashes or packages. It streams whatever
//! a [`Fetcher`] yields into a file, reporting progress on an optional channel,
//! and finishes with exactly one terminal result.

mod file;
mod http;

pub use file::FileFetcher;
pub use http::HttpFetcher;

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum DownloadError {
  #[error("HTTP request failed: {0}")]
  Http(String),

  #[error("HTTP {status} for URL: {url}")]
  HttpStatus { status: u16, url: String },

  #[error("failed to write {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("download ended after {received} of {expected} bytes")]
  Truncated { expected: u64, received: u64 },
}

impl From<reqwest::Error> for DownloadError {
  fn from(err: reqwest::Error) -> Self {
    DownloadError::Http(err.to_string())
  }
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, DownloadError>> + Send>>;

/// An open response: the announced length, if any, and the body.
pub struct FetchResponse {
  pub total: Option<u64>,
  pub stream: ByteStream,
}

/// Capability injected by the host to fetch bytes from a URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, url: &str) -> Result<FetchResponse, DownloadError>;
}

/// Routes `file://` URLs to [`FileFetcher`] and everything else to [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct DefaultFetcher {
  http: HttpFetcher,
}

impl DefaultFetcher {
  pub fn new() -> Result<Self, DownloadError> {
    Ok(Self {
      http: HttpFetcher::new()?,
    })
  }
}

#[async_trait]
impl Fetcher for DefaultFetcher {
  async fn fetch(&self, url: &str) -> Result<FetchResponse, DownloadError> {
    if FileFetcher::path_for(url).is_some() {
      FileFetcher.fetch(url).await
    } else {
      self.http.fetch(url).await
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadProgress {
  pub total_bytes: Option<u64>,
  pub received_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
  pub path: PathBuf,
  pub bytes: u64,
}

/// Stream `url` into `dest`.
///
/// Progress events are sent after every chunk. On failure the partial file is
/// removed before the error is returned.
pub async fn download(
  fetcher: &dyn Fetcher,
  url: &str,
  dest: &Path,
  progress: Option<&UnboundedSender<DownloadProgress>>,
) -> Result<DownloadReport, DownloadError> {
  info!(url = %url, dest = %dest.display(), "downloading");

  let result = stream_to_file(fetcher, url, dest, progress).await;

  match &result {
    Ok(report) => debug!(url = %url, bytes = report.bytes, "download complete"),
    Err(e) => {
      warn!(url = %url, error = %e, "download failed");
      if let Err(rm) = tokio::fs::remove_file(dest).await
        && rm.kind() != io::ErrorKind::NotFound
      {
        warn!(path = %dest.display(), error = %rm, "failed to remove partial download");
      }
    }
  }

  result
}

async fn stream_to_file(
  fetcher: &dyn Fetcher,
  url: &str,
  dest: &Path,
  progress: Option<&UnboundedSender<DownloadProgress>>,
) -> Result<DownloadReport, DownloadError> {
  let io_err = |source: io::Error| DownloadError::Io {
    path: dest.to_path_buf(),
    source,
  };

  if let Some(parent) = dest.parent() {
    tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
  }

  let FetchResponse { total, mut stream } = fetcher.fetch(url).await?;
  let mut file = File::create(dest).await.map_err(io_err)?;
  let mut received: u64 = 0;

  while let Some(chunk) = stream.next().await {
    let chunk = chunk?;
    file.write_all(&chunk).await.map_err(io_err)?;
    received += chunk.len() as u64;

    if let Some(tx) = progress {
      // A dropped receiver only means nobody is watching.
      let _ = tx.send(DownloadProgress {
        total_bytes: total,
        received_bytes: received,
      });
    }
  }

  file.flush().await.map_err(io_err)?;
  file.sync_all().await.map_err(io_err)?;

  if let Some(expected) = total
    && expected != received
  {
    return Err(DownloadError::Truncated { expected, received });
  }

  Ok(DownloadReport {
    path: dest.to_path_buf(),
    bytes: received,
  })
}
