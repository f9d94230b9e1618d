//! Cache-tier fetcher backed by a [`ByteStore`].
//!
//! # Key Layout
//!
//! ```text
//! module/<sha256>               module bytes, content-addressed
//! manifest/<app>/<id>           raw manifest bytes
//! ```
//!
//! Each pinned manifest becomes a pin root named `<app>/<retention key>`
//! covering its module keys.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::store::ByteStore;
use super::{FetchError, Fetcher};
use crate::manifest::{FetchedManifest, LoadedManifest, Manifest, ModuleRef};
use crate::util::hash::Sha256Digest;

pub struct CacheFetcher {
  name: String,
  store: Arc<dyn ByteStore>,
}

impl CacheFetcher {
  pub fn new(name: impl Into<String>, store: Arc<dyn ByteStore>) -> Self {
    Self {
      name: name.into(),
      store,
    }
  }

  pub fn module_key(sha256: &Sha256Digest) -> String {
    format!("module/{sha256}")
  }

  pub fn manifest_key(app: &str, id: &str) -> String {
    format!("manifest/{app}/{id}")
  }

  pub fn pin_root(app: &str, manifest: &LoadedManifest) -> String {
    format!("{app}/{}", manifest.retention_key())
  }

  /// Store raw manifest bytes so later loads can be served offline.
  pub async fn seed_manifest(&self, app: &str, id: &str, bytes: &[u8]) -> Result<(), FetchError> {
    self.store.put(&Self::manifest_key(app, id), bytes).await?;
    Ok(())
  }
}

#[async_trait]
impl Fetcher for CacheFetcher {
  fn name(&self) -> &str {
    &self.name
  }

  async fn fetch(&self, app: &str, id: &str, sha256: &Sha256Digest, _url: &str) -> Result<Option<Vec<u8>>, FetchError> {
    let bytes = self.store.get(&Self::module_key(sha256)).await?;
    debug!(fetcher = %self.name, app, module = id, hit = bytes.is_some(), "cache lookup");
    Ok(bytes)
  }

  async fn fetch_manifest(&self, app: &str, id: &str, _url: Option<&str>) -> Result<Option<FetchedManifest>, FetchError> {
    let Some(bytes) = self.store.get(&Self::manifest_key(app, id)).await? else {
      return Ok(None);
    };
    Ok(Some(Manifest::parse(&bytes)?.into()))
  }

  async fn pin(&self, app: &str, manifest: &LoadedManifest) -> Result<(), FetchError> {
    let keys: Vec<String> = manifest
      .manifest()
      .modules()
      .iter()
      .map(|m| Self::module_key(&m.sha256))
      .collect();

    let root = Self::pin_root(app, manifest);
    debug!(fetcher = %self.name, app, root = %root, keys = keys.len(), "pinning manifest");
    self.store.pin(&root, &keys).await?;
    Ok(())
  }

  async fn unpin(&self, app: &str, manifest: &LoadedManifest) -> Result<(), FetchError> {
    let root = Self::pin_root(app, manifest);
    debug!(fetcher = %self.name, app, root = %root, "unpinning manifest");
    self.store.unpin(&root).await?;
    Ok(())
  }

  async fn populate(&self, app: &str, module: &ModuleRef, bytes: &[u8]) -> Result<(), FetchError> {
    debug!(fetcher = %self.name, app, module = %module.id, size = bytes.len(), "caching module");
    self.store.put(&Self::module_key(&module.sha256), bytes).await?;
    Ok(())
  }
}
