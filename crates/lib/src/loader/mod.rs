//! Application loading.
//!
//! This module provides the main entry point for loading an application. It:
//! 1. Fetches and verifies the manifest through the chain
//! 2. Plans module fetches into dependency waves
//! 3. Fetches each wave in parallel, bounded per load and by the global gate
//! 4. Pins the manifest only after every module verified
//!
//! Dropping a `load` future cancels its in-flight module fetches and releases
//! their gate slots. Once all modules verified, the pin transition runs on its
//! own task so a late cancellation cannot leave it half done.

mod types;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::chain::{FetchChain, FetchedModule};
use crate::fetcher::Fetcher;
use crate::gate::ConcurrencyGate;
use crate::manifest::{LoadedManifest, Manifest, ManifestRequest};
use crate::registry::PinRegistry;

pub use types::{ConfigError, LoadError, LoadedApplication, LoaderConfig};

#[derive(Debug)]
pub struct Loader {
  chain: FetchChain,
  registry: Arc<PinRegistry>,
  config: LoaderConfig,
}

impl Loader {
  /// Build a loader over `fetchers`, sharing an existing gate.
  pub fn new(fetchers: Vec<Arc<dyn Fetcher>>, gate: ConcurrencyGate, config: LoaderConfig) -> Result<Self, LoadError> {
    config.validate()?;
    let chain = FetchChain::new(fetchers, gate).with_manifest_digest_required(config.require_manifest_digest);
    let registry = Arc::new(PinRegistry::new(chain.fetchers().to_vec()));
    Ok(Self {
      chain,
      registry,
      config,
    })
  }

  /// Build a loader with its own gate sized by `config.gate_capacity`.
  pub fn from_config(fetchers: Vec<Arc<dyn Fetcher>>, config: LoaderConfig) -> Result<Self, LoadError> {
    config.validate()?;
    let gate = ConcurrencyGate::new(config.gate_capacity)?;
    Self::new(fetchers, gate, config)
  }

  pub fn chain(&self) -> &FetchChain {
    &self.chain
  }

  pub fn registry(&self) -> &PinRegistry {
    &self.registry
  }

  pub fn config(&self) -> &LoaderConfig {
    &self.config
  }

  /// Load `app`: fetch its manifest and every module, verify, then pin.
  ///
  /// On any failure the previously pinned manifest stays pinned.
  pub async fn load(&self, app: &str, request: &ManifestRequest) -> Result<LoadedApplication, LoadError> {
    info!(app, manifest = %request.id, "loading application");

    let manifest = self.chain.fetch_manifest(app, request).await?;
    let modules = self.fetch_modules(app, manifest.manifest()).await?;

    let registry = self.registry.clone();
    let commit_app = app.to_string();
    let commit = manifest.clone();
    tokio::spawn(async move { registry.load(&commit_app, commit).await })
      .await
      .map_err(|e| LoadError::Task(e.to_string()))??;

    info!(app, modules = modules.len(), source = manifest.source(), "application loaded");
    Ok(LoadedApplication { manifest, modules })
  }

  /// Fetch every module of `manifest`, returning them in load order.
  async fn fetch_modules(&self, app: &str, manifest: &Manifest) -> Result<Vec<FetchedModule>, LoadError> {
    let plan = manifest.plan()?;
    let waves = plan.waves();
    debug!(app, modules = plan.len(), waves = waves.len(), "computed fetch waves");

    let limit = Arc::new(Semaphore::new(self.config.module_parallelism));
    let mut fetched: HashMap<String, FetchedModule> = HashMap::new();

    for (wave_idx, wave) in waves.into_iter().enumerate() {
      debug!(app, wave = wave_idx, modules = wave.len(), "fetching wave");

      let mut join_set = JoinSet::new();
      for module in wave {
        let chain = self.chain.clone();
        let module = module.clone();
        let app = app.to_string();
        let limit = limit.clone();

        join_set.spawn(async move {
          let _permit = limit
            .acquire_owned()
            .await
            .map_err(|e| LoadError::Task(e.to_string()))?;
          Ok::<_, LoadError>(chain.fetch_module(&app, &module).await?)
        });
      }

      // Returning early drops the set, which aborts the rest of the wave.
      while let Some(joined) = join_set.join_next().await {
        let module = match joined {
          Ok(Ok(module)) => module,
          Ok(Err(e)) => {
            error!(app, error = %e, "module fetch failed");
            return Err(e);
          }
          Err(e) => {
            error!(app, error = %e, "module task panicked");
            return Err(LoadError::Task(e.to_string()));
          }
        };
        fetched.insert(module.id.clone(), module);
      }
    }

    Ok(plan.load_order().filter_map(|m| fetched.remove(&m.id)).collect())
  }

  /// Unpin and forget `app`'s manifest.
  pub async fn unload(&self, app: &str) -> Option<LoadedManifest> {
    self.registry.unload_application(app).await
  }

  /// The manifest currently pinned for `app`.
  pub async fn current(&self, app: &str) -> Option<LoadedManifest> {
    self.registry.current(app).await
  }
}
