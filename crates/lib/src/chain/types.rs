//! Outcome types for chain requests.

use thiserror::Error;

use crate::fetcher::FetchError;
use crate::gate::GateError;
use crate::util::hash::Sha256Digest;

/// Errors that end a chain request.
///
/// Only an absent result falls through to the next source. Every variant
/// here stops the chain where it happened.
#[derive(Debug, Error)]
pub enum ChainError {
  /// A source raised an error instead of answering.
  #[error("fetcher '{fetcher}' failed: {source}")]
  Fetch {
    fetcher: String,
    #[source]
    source: FetchError,
  },

  /// A source answered with bytes that do not match the expected digest.
  #[error("integrity check failed for {artifact} from '{fetcher}': expected {expected}, got {actual}")]
  Integrity {
    fetcher: String,
    artifact: String,
    expected: String,
    actual: String,
  },

  #[error("manifest from '{fetcher}' is for application '{actual}', expected '{expected}'")]
  ApplicationMismatch {
    fetcher: String,
    expected: String,
    actual: String,
  },

  /// Manifest digests are required but the request supplied none.
  #[error("manifest request '{id}' carries no expected digest")]
  MissingManifestDigest { id: String },

  /// Every source reported the artifact absent.
  #[error("no source has {artifact}")]
  Exhausted { artifact: String },

  #[error(transparent)]
  Gate(#[from] GateError),
}

impl ChainError {
  /// A source failed to complete its attempt (network, disk).
  pub fn is_transport(&self) -> bool {
    matches!(
      self,
      ChainError::Fetch {
        source: FetchError::Transport { .. } | FetchError::Store(_),
        ..
      }
    )
  }

  /// A source answered, but the answer failed digest or structural validation.
  pub fn is_integrity(&self) -> bool {
    matches!(
      self,
      ChainError::Integrity { .. }
        | ChainError::ApplicationMismatch { .. }
        | ChainError::Fetch {
          source: FetchError::Manifest(_),
          ..
        }
    )
  }

  /// The request itself was rejected before any source was asked.
  pub fn is_rejected_request(&self) -> bool {
    matches!(self, ChainError::MissingManifestDigest { .. })
  }

  /// No source had the artifact.
  pub fn is_not_found(&self) -> bool {
    matches!(self, ChainError::Exhausted { .. })
  }
}

/// Verified module bytes and the source that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedModule {
  pub id: String,
  pub sha256: Sha256Digest,
  pub bytes: Vec<u8>,
  pub source: String,
}
