use thiserror::Error;

use crate::util::hash::DigestError;

/// Errors raised while parsing or validating a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
  /// The manifest bytes are not valid manifest JSON.
  #[error("failed to parse manifest: {0}")]
  Parse(String),

  #[error("unsupported manifest format version {version} (supported: {supported})")]
  UnsupportedVersion { version: u32, supported: u32 },

  #[error("manifest has an empty application name")]
  EmptyApplication,

  #[error("module at position {index} has an empty id")]
  EmptyModuleId { index: usize },

  #[error("duplicate module id '{id}'")]
  DuplicateModule { id: String },

  #[error("module '{id}' has a malformed sha256 digest: {source}")]
  MalformedDigest {
    id: String,
    #[source]
    source: DigestError,
  },

  #[error("module '{id}' depends on unknown module '{dependency}'")]
  UnknownDependency { id: String, dependency: String },

  #[error("module '{id}' depends on itself")]
  SelfDependency { id: String },

  /// The dependency graph is not acyclic; `id` is a module on the cycle.
  #[error("dependency cycle detected involving module '{id}'")]
  Cycle { id: String },

  /// A dependency is listed after the module that needs it.
  #[error("module '{id}' is listed before its dependency '{dependency}'")]
  OutOfOrder { id: String, dependency: String },
}

impl From<serde_json::Error> for ManifestError {
  fn from(e: serde_json::Error) -> Self {
    ManifestError::Parse(e.to_string())
  }
}
