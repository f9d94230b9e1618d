//! Pin registry: which manifest each application currently holds.
//!
//! # Transition Order
//!
//! Replacing an application's manifest pins the new one on every fetcher
//! before unpinning the old one anywhere. A concurrent evictor therefore never
//! sees a moment where modules shared by both manifests are unreferenced.
//!
//! # Atomicity
//!
//! - A pin failure unpins the new manifest from the fetchers already pinned
//!   and leaves the registry entry as it was. When the new manifest equals
//!   the registered one those pins are shared, so nothing is unpinned.
//! - Unpin is advisory; failures are logged and never undo a transition.
//!
//! Load and unload for the same application are serialized by a
//! per-application lock. Different applications proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::fetcher::{FetchError, Fetcher};
use crate::manifest::LoadedManifest;

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("failed to pin manifest for '{app}' on '{fetcher}': {source}")]
  Pin {
    app: String,
    fetcher: String,
    #[source]
    source: FetchError,
  },
}

type Slot = Arc<AsyncMutex<Option<LoadedManifest>>>;

pub struct PinRegistry {
  fetchers: Arc<[Arc<dyn Fetcher>]>,
  entries: Mutex<HashMap<String, Slot>>,
}

impl std::fmt::Debug for PinRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PinRegistry")
      .field("fetchers", &self.fetchers.len())
      .field("applications", &self.applications())
      .finish()
  }
}

impl PinRegistry {
  pub fn new(fetchers: impl Into<Arc<[Arc<dyn Fetcher>]>>) -> Self {
    Self {
      fetchers: fetchers.into(),
      entries: Mutex::new(HashMap::new()),
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn slot(&self, app: &str) -> Slot {
    self.entries().entry(app.to_string()).or_default().clone()
  }

  /// Make `manifest` the pinned manifest for `app`.
  ///
  /// Returns the manifest it replaced, if any.
  pub async fn load(&self, app: &str, manifest: LoadedManifest) -> Result<Option<LoadedManifest>, RegistryError> {
    let slot = self.slot(app);
    let mut current = slot.lock().await;

    if let Err(e) = self.pin_all(app, &manifest, current.as_ref()).await {
      self.release_if_idle(app, &slot, current.is_none());
      return Err(e);
    }

    let previous = current.replace(manifest);
    if let (Some(old), Some(new)) = (&previous, current.as_ref()) {
      if old.same_manifest(new) {
        debug!(app, "manifest unchanged, keeping pins");
      } else {
        self.unpin_all(app, old).await;
      }
    }

    info!(app, replaced = previous.is_some(), "manifest pinned");
    Ok(previous)
  }

  /// Unpin and forget the manifest registered for `app`.
  pub async fn unload_application(&self, app: &str) -> Option<LoadedManifest> {
    let slot = self.slot(app);
    let mut current = slot.lock().await;

    let previous = current.take();
    if let Some(old) = &previous {
      self.unpin_all(app, old).await;
      info!(app, "application unloaded");
    }
    self.release_if_idle(app, &slot, true);
    previous
  }

  /// Drop the map entry for an empty slot nobody else is waiting on.
  ///
  /// Slots are only cloned under the map lock, so the count checked here
  /// cannot grow before the entry is removed.
  fn release_if_idle(&self, app: &str, slot: &Slot, empty: bool) {
    if !empty {
      return;
    }
    let mut entries = self.entries();
    // One reference held by the map, one by the caller.
    if Arc::strong_count(slot) == 2 && entries.get(app).is_some_and(|held| Arc::ptr_eq(held, slot)) {
      entries.remove(app);
      debug!(app, "registry entry released");
    }
  }

  /// The manifest currently pinned for `app`.
  pub async fn current(&self, app: &str) -> Option<LoadedManifest> {
    let slot = self.entries().get(app).cloned()?;
    let current = slot.lock().await;
    current.clone()
  }

  /// Applications with a pinned manifest or an operation in flight, sorted.
  pub fn applications(&self) -> Vec<String> {
    let mut apps: Vec<String> = self.entries().keys().cloned().collect();
    apps.sort();
    apps
  }

  async fn pin_all(
    &self,
    app: &str,
    manifest: &LoadedManifest,
    current: Option<&LoadedManifest>,
  ) -> Result<(), RegistryError> {
    for (position, fetcher) in self.fetchers.iter().enumerate() {
      if let Err(source) = fetcher.pin(app, manifest).await {
        // Pins of an equal manifest are the registered manifest's pins.
        if current.is_some_and(|current| current.same_manifest(manifest)) {
          warn!(app, fetcher = fetcher.name(), error = %source, "re-pin failed, keeping existing pins");
          return Err(RegistryError::Pin {
            app: app.to_string(),
            fetcher: fetcher.name().to_string(),
            source,
          });
        }

        warn!(app, fetcher = fetcher.name(), error = %source, "pin failed, rolling back");
        for pinned in &self.fetchers[..position] {
          if let Err(e) = pinned.unpin(app, manifest).await {
            warn!(app, fetcher = pinned.name(), error = %e, "rollback unpin failed");
          }
        }
        return Err(RegistryError::Pin {
          app: app.to_string(),
          fetcher: fetcher.name().to_string(),
          source,
        });
      }
    }
    Ok(())
  }

  async fn unpin_all(&self, app: &str, manifest: &LoadedManifest) {
    for fetcher in self.fetchers.iter() {
      if let Err(e) = fetcher.unpin(app, manifest).await {
        warn!(app, fetcher = fetcher.name(), error = %e, "unpin failed");
      }
    }
  }
}
