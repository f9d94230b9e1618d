//! Resources bundled with the host process.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{FetchError, Fetcher};
use crate::manifest::{FetchedManifest, Manifest};
use crate::util::hash::Sha256Digest;

/// A fetcher over in-memory resources.
///
/// Lookups never block on I/O, so this source does not take gate slots.
#[derive(Debug, Default)]
pub struct EmbeddedFetcher {
  name: String,
  modules: HashMap<String, Vec<u8>>,
  manifests: HashMap<(String, String), Vec<u8>>,
}

impl EmbeddedFetcher {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Self::default()
    }
  }

  /// Bundle the bytes of module `id`.
  pub fn with_module(mut self, id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
    self.modules.insert(id.into(), bytes.into());
    self
  }

  /// Bundle raw manifest JSON for `app`.
  pub fn with_manifest(mut self, app: impl Into<String>, id: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
    self.manifests.insert((app.into(), id.into()), bytes.into());
    self
  }
}

#[async_trait]
impl Fetcher for EmbeddedFetcher {
  fn name(&self) -> &str {
    &self.name
  }

  fn gated(&self) -> bool {
    false
  }

  async fn fetch(&self, _app: &str, id: &str, _sha256: &Sha256Digest, _url: &str) -> Result<Option<Vec<u8>>, FetchError> {
    Ok(self.modules.get(id).cloned())
  }

  async fn fetch_manifest(&self, app: &str, id: &str, _url: Option<&str>) -> Result<Option<FetchedManifest>, FetchError> {
    match self.manifests.get(&(app.to_string(), id.to_string())) {
      Some(bytes) => Ok(Some(Manifest::parse(bytes)?.into())),
      None => Ok(None),
    }
  }
}
