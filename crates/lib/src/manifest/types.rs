//! Manifest types.
//!
//! # Structure
//!
//! - [`ModuleRef`]: one module's id, expected digest, URL and dependencies
//! - [`Manifest`]: an application's ordered module list plus unsigned metadata
//! - [`LoadedManifest`]: a manifest plus where it came from; the unit of pinning
//!
//! # Wire Format
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "application": "demo",
//!   "modules": [
//!     { "id": "core", "sha256": "9f86d0...", "url": "https://cdn.example/core.bin" },
//!     { "id": "ui", "sha256": "a1b2c3...", "url": "https://cdn.example/ui.bin", "depends_on": ["core"] }
//!   ],
//!   "metadata": { "channel": "stable" }
//! }
//! ```
//!
//! # Equality
//!
//! Two manifests are equal when their ordered module lists are equal. The
//! application name, format version, metadata and source digest are ignored.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::error::ManifestError;
use super::resolver::LoadPlan;
use crate::consts::MANIFEST_FORMAT_VERSION;
use crate::util::hash::Sha256Digest;

/// A reference to exactly one module's expected bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleRef {
  pub id: String,
  pub sha256: Sha256Digest,
  pub url: String,
  /// Ids of modules that must load before this one.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
}

impl ModuleRef {
  pub fn new(id: impl Into<String>, sha256: Sha256Digest, url: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      sha256,
      url: url.into(),
      depends_on: Vec::new(),
    }
  }

  /// Add a dependency on another module id.
  pub fn depends_on(mut self, id: impl Into<String>) -> Self {
    self.depends_on.push(id.into());
    self
  }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
  format_version: u32,
  application: String,
  modules: Vec<RawModule>,
  #[serde(default)]
  metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawModule {
  id: String,
  sha256: String,
  url: String,
  #[serde(default)]
  depends_on: Vec<String>,
}

#[derive(Serialize)]
struct ManifestRepr<'a> {
  format_version: u32,
  application: &'a str,
  modules: &'a [ModuleRef],
  #[serde(skip_serializing_if = "BTreeMap::is_empty")]
  metadata: &'a BTreeMap<String, serde_json::Value>,
}

/// The modules an application needs, in load order.
///
/// Construct with [`Manifest::parse`] or [`Manifest::new`]; both validate,
/// so a `Manifest` is always well formed.
#[derive(Debug, Clone)]
pub struct Manifest {
  application: String,
  format_version: u32,
  modules: Vec<ModuleRef>,
  metadata: BTreeMap<String, serde_json::Value>,
  source_digest: Option<Sha256Digest>,
}

impl Manifest {
  /// Build a manifest in memory and validate it.
  pub fn new(application: impl Into<String>, modules: Vec<ModuleRef>) -> Result<Self, ManifestError> {
    let manifest = Self {
      application: application.into(),
      format_version: MANIFEST_FORMAT_VERSION,
      modules,
      metadata: BTreeMap::new(),
      source_digest: None,
    };
    manifest.validate()?;
    Ok(manifest)
  }

  /// Parse and validate manifest JSON.
  ///
  /// The SHA-256 of `bytes` is recorded as the manifest's source digest.
  pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
    let raw: RawManifest = serde_json::from_slice(bytes)?;

    if raw.format_version != MANIFEST_FORMAT_VERSION {
      return Err(ManifestError::UnsupportedVersion {
        version: raw.format_version,
        supported: MANIFEST_FORMAT_VERSION,
      });
    }

    let modules = raw
      .modules
      .into_iter()
      .map(|m| {
        let sha256 = m.sha256.parse().map_err(|source| ManifestError::MalformedDigest {
          id: m.id.clone(),
          source,
        })?;
        Ok(ModuleRef {
          id: m.id,
          sha256,
          url: m.url,
          depends_on: m.depends_on,
        })
      })
      .collect::<Result<Vec<_>, ManifestError>>()?;

    let manifest = Self {
      application: raw.application,
      format_version: raw.format_version,
      modules,
      metadata: raw.metadata,
      source_digest: Some(Sha256Digest::compute(bytes)),
    };
    manifest.validate()?;
    Ok(manifest)
  }

  fn validate(&self) -> Result<(), ManifestError> {
    if self.application.is_empty() {
      return Err(ManifestError::EmptyApplication);
    }
    LoadPlan::from_modules(&self.modules)?;
    Ok(())
  }

  /// Attach unsigned metadata.
  pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
    self.metadata.insert(key.into(), value);
    self
  }

  /// Serialize to manifest JSON.
  pub fn to_json_vec(&self) -> Result<Vec<u8>, ManifestError> {
    let repr = ManifestRepr {
      format_version: self.format_version,
      application: &self.application,
      modules: &self.modules,
      metadata: &self.metadata,
    };
    Ok(serde_json::to_vec_pretty(&repr)?)
  }

  pub fn application(&self) -> &str {
    &self.application
  }

  pub fn format_version(&self) -> u32 {
    self.format_version
  }

  /// Modules in load order.
  pub fn modules(&self) -> &[ModuleRef] {
    &self.modules
  }

  pub fn module(&self, id: &str) -> Option<&ModuleRef> {
    self.modules.iter().find(|m| m.id == id)
  }

  pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
    &self.metadata
  }

  /// SHA-256 of the bytes this manifest was parsed from, if any.
  pub fn source_digest(&self) -> Option<Sha256Digest> {
    self.source_digest
  }

  /// The load plan for this manifest.
  pub fn plan(&self) -> Result<LoadPlan<'_>, ManifestError> {
    LoadPlan::from_modules(&self.modules)
  }

  /// A digest identifying this manifest's module list.
  ///
  /// Covers every field [`PartialEq`] compares (id, digest, URL and
  /// dependencies of each module, in order), so two manifests share a key
  /// exactly when they are equal. Retention-capable stores key pins on it.
  pub fn retention_key(&self) -> Sha256Digest {
    let mut buf = Vec::new();
    for module in &self.modules {
      push_field(&mut buf, module.id.as_bytes());
      push_field(&mut buf, module.sha256.as_bytes());
      push_field(&mut buf, module.url.as_bytes());
      buf.extend_from_slice(&(module.depends_on.len() as u64).to_le_bytes());
      for dep in &module.depends_on {
        push_field(&mut buf, dep.as_bytes());
      }
    }
    Sha256Digest::compute(&buf)
  }
}

/// Length-prefixed so adjacent fields cannot run into each other.
fn push_field(buf: &mut Vec<u8>, field: &[u8]) {
  buf.extend_from_slice(&(field.len() as u64).to_le_bytes());
  buf.extend_from_slice(field);
}

impl PartialEq for Manifest {
  fn eq(&self, other: &Self) -> bool {
    self.modules == other.modules
  }
}

impl Eq for Manifest {}

/// A manifest as produced by a successful fetch.
///
/// This is the unit of pinning: retention is scoped to the whole manifest,
/// never to individual modules, since modules may be shared between manifests.
#[derive(Debug, Clone)]
pub struct LoadedManifest {
  manifest: Arc<Manifest>,
  source: String,
  freshness: Option<String>,
}

impl LoadedManifest {
  pub fn new(manifest: Manifest, source: impl Into<String>, freshness: Option<String>) -> Self {
    Self {
      manifest: Arc::new(manifest),
      source: source.into(),
      freshness,
    }
  }

  pub fn manifest(&self) -> &Manifest {
    &self.manifest
  }

  pub fn application(&self) -> &str {
    self.manifest.application()
  }

  /// Name of the fetcher that produced the manifest.
  pub fn source(&self) -> &str {
    &self.source
  }

  /// Freshness token (e.g. an HTTP `ETag`) reported by the source.
  pub fn freshness(&self) -> Option<&str> {
    self.freshness.as_deref()
  }

  pub fn retention_key(&self) -> Sha256Digest {
    self.manifest.retention_key()
  }

  /// Returns true if both wrap structurally equal manifests.
  pub fn same_manifest(&self, other: &LoadedManifest) -> bool {
    self.manifest == other.manifest
  }
}

/// What a fetcher returns for a manifest request.
#[derive(Debug, Clone)]
pub struct FetchedManifest {
  pub manifest: Manifest,
  pub freshness: Option<String>,
}

impl From<Manifest> for FetchedManifest {
  fn from(manifest: Manifest) -> Self {
    Self {
      manifest,
      freshness: None,
    }
  }
}

/// A request for an application's manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRequest {
  pub id: String,
  pub url: Option<String>,
  /// Expected SHA-256 of the manifest bytes, when the caller knows it.
  pub sha256: Option<Sha256Digest>,
}

impl ManifestRequest {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      url: None,
      sha256: None,
    }
  }

  pub fn with_url(mut self, url: impl Into<String>) -> Self {
    self.url = Some(url.into());
    self
  }

  pub fn with_sha256(mut self, sha256: Sha256Digest) -> Self {
    self.sha256 = Some(sha256);
    self
  }
}
