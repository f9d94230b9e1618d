//! The fetch chain.
//!
//! A chain is an immutable, ordered list of fetchers. For each request it:
//! 1. Tries fetchers strictly in order, one at a time, holding a gate slot
//!    around each gated call
//! 2. Falls through to the next fetcher only on an absent result
//! 3. Aborts on the first error, never masking it with a later source
//! 4. Verifies what it got; a wrong answer aborts rather than falls through
//! 5. Reports `Exhausted` if every fetcher was absent
//!
//! Earlier fetchers are cheaper or more trusted and always get first refusal.

mod types;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::fetcher::Fetcher;
use crate::gate::{ConcurrencyGate, GatePermit};
use crate::manifest::{LoadedManifest, Manifest, ManifestRequest, ModuleRef};
use crate::util::hash::Sha256Digest;

pub use types::{ChainError, FetchedModule};

#[derive(Clone)]
pub struct FetchChain {
  fetchers: Arc<[Arc<dyn Fetcher>]>,
  gate: ConcurrencyGate,
  require_manifest_digest: bool,
}

impl fmt::Debug for FetchChain {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("FetchChain")
      .field("fetchers", &self.names())
      .field("gate_capacity", &self.gate.capacity())
      .field("require_manifest_digest", &self.require_manifest_digest)
      .finish()
  }
}

impl FetchChain {
  pub fn new(fetchers: Vec<Arc<dyn Fetcher>>, gate: ConcurrencyGate) -> Self {
    Self {
      fetchers: fetchers.into(),
      gate,
      require_manifest_digest: false,
    }
  }

  /// Require every manifest request to carry, and every manifest to match,
  /// an expected digest.
  pub fn with_manifest_digest_required(mut self, required: bool) -> Self {
    self.require_manifest_digest = required;
    self
  }

  pub fn fetchers(&self) -> &[Arc<dyn Fetcher>] {
    &self.fetchers
  }

  pub fn names(&self) -> Vec<&str> {
    self.fetchers.iter().map(|f| f.name()).collect()
  }

  pub fn gate(&self) -> &ConcurrencyGate {
    &self.gate
  }

  async fn slot(&self, fetcher: &dyn Fetcher) -> Result<Option<GatePermit>, ChainError> {
    if !fetcher.gated() {
      return Ok(None);
    }
    Ok(Some(self.gate.acquire().await?))
  }

  /// Fetch and verify one module's bytes.
  pub async fn fetch_module(&self, app: &str, module: &ModuleRef) -> Result<FetchedModule, ChainError> {
    for (position, fetcher) in self.fetchers.iter().enumerate() {
      let result = {
        let _permit = self.slot(fetcher.as_ref()).await?;
        fetcher.fetch(app, &module.id, &module.sha256, &module.url).await
      };

      let bytes = match result {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
          debug!(app, module = %module.id, fetcher = fetcher.name(), "absent, trying next source");
          continue;
        }
        Err(source) => {
          error!(app, module = %module.id, fetcher = fetcher.name(), error = %source, "fetch failed");
          return Err(ChainError::Fetch {
            fetcher: fetcher.name().to_string(),
            source,
          });
        }
      };

      if !module.sha256.matches(&bytes) {
        let actual = Sha256Digest::compute(&bytes);
        error!(
          app,
          module = %module.id,
          fetcher = fetcher.name(),
          expected = %module.sha256,
          actual = %actual,
          "digest mismatch"
        );
        return Err(ChainError::Integrity {
          fetcher: fetcher.name().to_string(),
          artifact: format!("module '{}'", module.id),
          expected: module.sha256.to_string(),
          actual: actual.to_string(),
        });
      }

      info!(app, module = %module.id, fetcher = fetcher.name(), size = bytes.len(), "module fetched");
      self.populate_earlier(app, module, &bytes, position).await;

      return Ok(FetchedModule {
        id: module.id.clone(),
        sha256: module.sha256,
        bytes,
        source: fetcher.name().to_string(),
      });
    }

    warn!(app, module = %module.id, "no source has module");
    Err(ChainError::Exhausted {
      artifact: format!("module '{}'", module.id),
    })
  }

  /// Offer verified bytes to the fetchers that reported them absent.
  async fn populate_earlier(&self, app: &str, module: &ModuleRef, bytes: &[u8], position: usize) {
    for fetcher in &self.fetchers[..position] {
      let _permit = match self.slot(fetcher.as_ref()).await {
        Ok(permit) => permit,
        Err(e) => {
          warn!(app, module = %module.id, fetcher = fetcher.name(), error = %e, "skipping populate");
          return;
        }
      };
      if let Err(e) = fetcher.populate(app, module, bytes).await {
        warn!(app, module = %module.id, fetcher = fetcher.name(), error = %e, "populate failed");
      }
    }
  }

  /// Fetch and verify an application's manifest.
  pub async fn fetch_manifest(&self, app: &str, request: &ManifestRequest) -> Result<LoadedManifest, ChainError> {
    if self.require_manifest_digest && request.sha256.is_none() {
      return Err(ChainError::MissingManifestDigest { id: request.id.clone() });
    }

    for fetcher in self.fetchers.iter() {
      let result = {
        let _permit = self.slot(fetcher.as_ref()).await?;
        fetcher.fetch_manifest(app, &request.id, request.url.as_deref()).await
      };

      let fetched = match result {
        Ok(Some(fetched)) => fetched,
        Ok(None) => {
          debug!(app, manifest = %request.id, fetcher = fetcher.name(), "absent, trying next source");
          continue;
        }
        Err(source) => {
          error!(app, manifest = %request.id, fetcher = fetcher.name(), error = %source, "manifest fetch failed");
          return Err(ChainError::Fetch {
            fetcher: fetcher.name().to_string(),
            source,
          });
        }
      };

      self.verify_manifest(fetcher.name(), app, request, &fetched.manifest)?;

      info!(
        app,
        manifest = %request.id,
        fetcher = fetcher.name(),
        modules = fetched.manifest.modules().len(),
        "manifest fetched"
      );
      return Ok(LoadedManifest::new(fetched.manifest, fetcher.name(), fetched.freshness));
    }

    warn!(app, manifest = %request.id, "no source has manifest");
    Err(ChainError::Exhausted {
      artifact: format!("manifest '{}' for application '{app}'", request.id),
    })
  }

  fn verify_manifest(
    &self,
    fetcher: &str,
    app: &str,
    request: &ManifestRequest,
    manifest: &Manifest,
  ) -> Result<(), ChainError> {
    if manifest.application() != app {
      return Err(ChainError::ApplicationMismatch {
        fetcher: fetcher.to_string(),
        expected: app.to_string(),
        actual: manifest.application().to_string(),
      });
    }

    let Some(expected) = request.sha256 else {
      warn!(app, manifest = %request.id, "no expected manifest digest, skipping check");
      return Ok(());
    };

    match manifest.source_digest() {
      Some(actual) if actual == expected => Ok(()),
      Some(actual) => Err(ChainError::Integrity {
        fetcher: fetcher.to_string(),
        artifact: format!("manifest '{}'", request.id),
        expected: expected.to_string(),
        actual: actual.to_string(),
      }),
      None if self.require_manifest_digest => Err(ChainError::Integrity {
        fetcher: fetcher.to_string(),
        artifact: format!("manifest '{}'", request.id),
        expected: expected.to_string(),
        actual: "unknown".to_string(),
      }),
      None => {
        warn!(app, manifest = %request.id, fetcher, "source cannot attest manifest digest, accepting");
        Ok(())
      }
    }
  }
}
