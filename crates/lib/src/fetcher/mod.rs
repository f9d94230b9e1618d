//! Sources of module bytes and manifests.
//!
//! A [`Fetcher`] is one configured source: bytes embedded in the host, a
//! local cache, or the network. Fetchers are composed into an ordered chain
//! (see [`crate::chain`]) that tries each in priority order.
//!
//! # Absent vs. Error
//!
//! `Ok(None)` means "this source does not have it" and lets the chain fall
//! through to the next source. `Err(_)` means the source failed to complete
//! the attempt and aborts the chain.

mod cache;
mod embedded;
mod http;
mod store;

use async_trait::async_trait;
use thiserror::Error;

use crate::manifest::{FetchedManifest, LoadedManifest, ManifestError, ModuleRef};
use crate::util::hash::Sha256Digest;

pub use cache::CacheFetcher;
pub use embedded::EmbeddedFetcher;
pub use http::HttpFetcher;
pub use store::{ByteStore, GcResult, GcStats, MemoryStore, StoreError};

/// Errors a fetcher may raise.
#[derive(Debug, Error)]
pub enum FetchError {
  /// The network or another transport failed to complete the attempt.
  #[error("transport failure for '{url}': {message}")]
  Transport { url: String, message: String },

  /// The backing byte store failed.
  #[error("store failure: {0}")]
  Store(#[from] StoreError),

  /// The source returned manifest bytes that do not parse.
  #[error(transparent)]
  Manifest(#[from] ManifestError),
}

/// One source of module bytes and manifests.
///
/// Retention hooks (`pin`, `unpin`) are advisory and default to no-ops for
/// sources without retention semantics. Implementations must make them
/// idempotent.
#[async_trait]
pub trait Fetcher: Send + Sync {
  /// Human-readable name, used in logs and provenance.
  fn name(&self) -> &str;

  /// Whether calls to this source must hold a concurrency gate slot.
  ///
  /// Sources that never touch disk or network may opt out.
  fn gated(&self) -> bool {
    true
  }

  /// Produce the bytes of module `id`, or `None` if this source lacks it.
  ///
  /// The chain verifies the bytes against `sha256`; implementations need not.
  async fn fetch(&self, app: &str, id: &str, sha256: &Sha256Digest, url: &str) -> Result<Option<Vec<u8>>, FetchError>;

  /// Produce the manifest `id` for `app`, or `None` if this source lacks it.
  async fn fetch_manifest(&self, app: &str, id: &str, url: Option<&str>) -> Result<Option<FetchedManifest>, FetchError>;

  /// Retain the artifacts backing `manifest`.
  async fn pin(&self, _app: &str, _manifest: &LoadedManifest) -> Result<(), FetchError> {
    Ok(())
  }

  /// Release the retention taken by [`Fetcher::pin`].
  async fn unpin(&self, _app: &str, _manifest: &LoadedManifest) -> Result<(), FetchError> {
    Ok(())
  }

  /// Offered verified bytes for a module this source reported absent.
  ///
  /// Cache tiers store them so the next load hits earlier in the chain.
  async fn populate(&self, _app: &str, _module: &ModuleRef, _bytes: &[u8]) -> Result<(), FetchError> {
    Ok(())
  }
}
