//! Types for application loading.
//!
//! This module defines the configuration, error and result types for
//! [`super::Loader`].

use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::chain::{ChainError, FetchedModule};
use crate::consts::{DEFAULT_GATE_CAPACITY, ENV_GATE_CAPACITY, ENV_MODULE_PARALLELISM, ENV_REQUIRE_MANIFEST_DIGEST};
use crate::gate::GateError;
use crate::manifest::{LoadedManifest, ManifestError};
use crate::registry::RegistryError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("failed to parse loader config: {0}")]
  Parse(String),

  #[error("invalid value '{value}' for {var}")]
  InvalidEnv { var: &'static str, value: String },

  #[error("{field} must be at least 1")]
  Zero { field: &'static str },
}

/// Errors that can occur while loading an application.
#[derive(Debug, Error)]
pub enum LoadError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Gate(#[from] GateError),

  /// Fetching the manifest or a module failed.
  #[error(transparent)]
  Chain(#[from] ChainError),

  #[error(transparent)]
  Manifest(#[from] ManifestError),

  /// Pinning the new manifest failed; the previous pin is untouched.
  #[error(transparent)]
  Registry(#[from] RegistryError),

  /// A background task panicked or was aborted.
  #[error("load task failed: {0}")]
  Task(String),
}

/// Configuration for the loader.
///
/// Deserializes from JSON with every field optional:
///
/// ```json
/// { "gate_capacity": 4, "module_parallelism": 2, "require_manifest_digest": true }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
  /// Maximum number of fetch attempts in flight process-wide.
  pub gate_capacity: usize,

  /// Maximum number of modules one load fetches in parallel.
  pub module_parallelism: usize,

  /// Whether manifest requests must carry an expected digest.
  pub require_manifest_digest: bool,
}

impl Default for LoaderConfig {
  fn default() -> Self {
    Self {
      gate_capacity: DEFAULT_GATE_CAPACITY,
      module_parallelism: num_cpus(),
      require_manifest_digest: false,
    }
  }
}

impl LoaderConfig {
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
  }

  /// Apply `APPLOADER_*` environment overrides.
  pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
    if let Some(value) = env_value(ENV_GATE_CAPACITY)? {
      self.gate_capacity = value;
    }
    if let Some(value) = env_value(ENV_MODULE_PARALLELISM)? {
      self.module_parallelism = value;
    }
    if let Some(value) = env_value(ENV_REQUIRE_MANIFEST_DIGEST)? {
      self.require_manifest_digest = value;
    }
    self.validate()?;
    Ok(self)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.gate_capacity == 0 {
      return Err(ConfigError::Zero { field: "gate_capacity" });
    }
    if self.module_parallelism == 0 {
      return Err(ConfigError::Zero {
        field: "module_parallelism",
      });
    }
    Ok(())
  }
}

fn env_value<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
  let Ok(raw) = std::env::var(var) else {
    return Ok(None);
  };
  debug!(var, value = %raw, "config override from environment");
  raw
    .trim()
    .parse()
    .map(Some)
    .map_err(|_| ConfigError::InvalidEnv { var, value: raw })
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// A successfully loaded application.
#[derive(Debug, Clone)]
pub struct LoadedApplication {
  /// The manifest now pinned for the application.
  pub manifest: LoadedManifest,

  /// Verified module bytes, in load order.
  pub modules: Vec<FetchedModule>,
}

impl LoadedApplication {
  pub fn module(&self, id: &str) -> Option<&FetchedModule> {
    self.modules.iter().find(|m| m.id == id)
  }

  /// Module ids in load order.
  pub fn module_ids(&self) -> Vec<&str> {
    self.modules.iter().map(|m| m.id.as_str()).collect()
  }
}
