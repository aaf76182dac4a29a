use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use tracing::debug;

use super::{DownloadError, FetchResponse, Fetcher};

/// [`Fetcher`] over HTTP(S) using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
  client: Client,
}

impl HttpFetcher {
  pub fn new() -> Result<Self, DownloadError> {
    let client = Client::builder()
      .user_agent(concat!("hotload/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, url: &str) -> Result<FetchResponse, DownloadError> {
    // No overall timeout: artifacts can take arbitrarily long on slow links.
    let resp = self.client.get(url).send().await?;
    let status = resp.status();

    if !status.is_success() {
      return Err(DownloadError::HttpStatus {
        status: status.as_u16(),
        url: url.to_string(),
      });
    }

    let total = resp.content_length();
    debug!(url = %url, total = ?total, "response received");

    let stream = resp.bytes_stream().map_err(DownloadError::from);
    Ok(FetchResponse {
      total,
      stream: Box::pin(stream),
    })
  }
}
