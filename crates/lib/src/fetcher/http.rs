//! Network-tier fetcher over HTTP.
//!
//! Status mapping:
//! - `2xx` -> bytes
//! - `404`, `410` -> absent
//! - anything else, or a connection failure -> [`FetchError::Transport`]
//!
//! Timeouts and connection reuse are the client's concern; this fetcher
//! never retries.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::ETAG;
use tracing::{debug, info};

use super::{FetchError, Fetcher};
use crate::manifest::{FetchedManifest, Manifest};
use crate::util::hash::Sha256Digest;

pub struct HttpFetcher {
  name: String,
  client: reqwest::Client,
}

struct Response {
  bytes: Vec<u8>,
  etag: Option<String>,
}

impl HttpFetcher {
  pub fn new(name: impl Into<String>) -> Self {
    Self::with_client(name, reqwest::Client::new())
  }

  pub fn with_client(name: impl Into<String>, client: reqwest::Client) -> Self {
    Self {
      name: name.into(),
      client,
    }
  }

  /// Build a fetcher whose requests fail after `timeout`.
  pub fn with_timeout(name: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| FetchError::Transport {
        url: String::new(),
        message: format!("failed to build HTTP client: {e}"),
      })?;
    Ok(Self::with_client(name, client))
  }

  async fn get(&self, url: &str) -> Result<Option<Response>, FetchError> {
    info!(fetcher = %self.name, url, "fetching URL");

    let response = self.client.get(url).send().await.map_err(|e| FetchError::Transport {
      url: url.to_string(),
      message: e.to_string(),
    })?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
      debug!(fetcher = %self.name, url, status = status.as_u16(), "not found");
      return Ok(None);
    }

    if !status.is_success() {
      return Err(FetchError::Transport {
        url: url.to_string(),
        message: format!("HTTP {status}"),
      });
    }

    let etag = response
      .headers()
      .get(ETAG)
      .and_then(|v| v.to_str().ok())
      .map(str::to_string);

    let bytes = response.bytes().await.map_err(|e| FetchError::Transport {
      url: url.to_string(),
      message: e.to_string(),
    })?;

    debug!(fetcher = %self.name, url, size = bytes.len(), "download complete");
    Ok(Some(Response {
      bytes: bytes.to_vec(),
      etag,
    }))
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  fn name(&self) -> &str {
    &self.name
  }

  async fn fetch(&self, _app: &str, _id: &str, _sha256: &Sha256Digest, url: &str) -> Result<Option<Vec<u8>>, FetchError> {
    Ok(self.get(url).await?.map(|r| r.bytes))
  }

  async fn fetch_manifest(&self, app: &str, id: &str, url: Option<&str>) -> Result<Option<FetchedManifest>, FetchError> {
    let Some(url) = url else {
      debug!(fetcher = %self.name, app, manifest = id, "no manifest URL, skipping");
      return Ok(None);
    };

    let Some(response) = self.get(url).await? else {
      return Ok(None);
    };

    Ok(Some(FetchedManifest {
      manifest: Manifest::parse(&response.bytes)?,
      freshness: response.etag,
    }))
  }
}
