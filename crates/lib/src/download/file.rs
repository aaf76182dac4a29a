use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use super::{DownloadError, FetchResponse, Fetcher};

const CHUNK_SIZE: usize = 64 * 1024;

/// [`Fetcher`] for `file://` URLs, used to sideload artifacts from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl FileFetcher {
  pub fn path_for(url: &str) -> Option<PathBuf> {
    url.strip_prefix("file://").map(PathBuf::from)
  }
}

#[async_trait]
impl Fetcher for FileFetcher {
  async fn fetch(&self, url: &str) -> Result<FetchResponse, DownloadError> {
    let path = Self::path_for(url).ok_or_else(|| DownloadError::Http(format!("not a file URL: {}", url)))?;

    let file = File::open(&path).await.map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        DownloadError::HttpStatus {
          status: 404,
          url: url.to_string(),
        }
      } else {
        DownloadError::Io {
          path: path.clone(),
          source: e,
        }
      }
    })?;
    let total = file.metadata().await.map(|m| m.len()).ok();

    let stream = futures::stream::unfold(Some((file, path)), |state| async move {
      let (mut file, path) = state?;
      let mut buf = vec![0u8; CHUNK_SIZE];
      match file.read(&mut buf).await {
        Ok(0) => None,
        Ok(n) => {
          buf.truncate(n);
          Some((Ok(Bytes::from(buf)), Some((file, path))))
        }
        Err(source) => Some((Err(DownloadError::Io { path, source }), None)),
      }
    });

    Ok(FetchResponse {
      total,
      stream: Box::pin(stream),
    })
  }
}
