//! Byte-store collaborator used by cache-tier fetchers.
//!
//! The loader only needs get/put plus pin/unpin from a store; eviction policy
//! belongs to the store. [`MemoryStore`] is a reference implementation whose
//! collector evicts exactly the blobs no pin root references.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("{operation} failed for '{key}': {message}")]
  Backend {
    operation: &'static str,
    key: String,
    message: String,
  },
}

/// Key/value byte storage with named pin roots.
///
/// A pin root names a set of keys that must survive eviction. Pinning the
/// same root twice replaces its key set; unpinning an unknown root is a no-op.
#[async_trait]
pub trait ByteStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

  async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

  async fn pin(&self, root: &str, keys: &[String]) -> Result<(), StoreError>;

  async fn unpin(&self, root: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct GcStats {
  pub scanned: usize,
  pub deleted: usize,
  pub bytes_freed: u64,
}

#[derive(Debug, serde::Serialize)]
pub struct GcResult {
  pub stats: GcStats,
  pub deleted_keys: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
  blobs: HashMap<String, Vec<u8>>,
  pins: HashMap<String, HashSet<String>>,
}

/// In-memory [`ByteStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
  inner: Mutex<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn inner(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn contains(&self, key: &str) -> bool {
    self.inner().blobs.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.inner().blobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner().blobs.is_empty()
  }

  /// Returns true if any pin root references `key`.
  pub fn is_pinned(&self, key: &str) -> bool {
    self.inner().pins.values().any(|keys| keys.contains(key))
  }

  /// Names of all current pin roots, sorted.
  pub fn pin_roots(&self) -> Vec<String> {
    let mut roots: Vec<String> = self.inner().pins.keys().cloned().collect();
    roots.sort();
    roots
  }

  /// Evict every blob no pin root references.
  pub fn collect_garbage(&self, dry_run: bool) -> GcResult {
    let mut inner = self.inner();
    let live: HashSet<String> = inner.pins.values().flatten().cloned().collect();
    debug!(count = live.len(), "collected live keys from pin roots");

    let mut stats = GcStats::default();
    let mut deleted_keys: Vec<String> = Vec::new();

    for (key, bytes) in &inner.blobs {
      stats.scanned += 1;
      if live.contains(key) {
        continue;
      }
      debug!(key, "removing unreferenced blob");
      stats.deleted += 1;
      stats.bytes_freed += bytes.len() as u64;
      deleted_keys.push(key.clone());
    }

    if !dry_run {
      for key in &deleted_keys {
        inner.blobs.remove(key);
      }
    }

    deleted_keys.sort();
    info!(
      deleted = stats.deleted,
      bytes_freed = stats.bytes_freed,
      dry_run,
      "garbage collection complete"
    );

    GcResult { stats, deleted_keys }
  }
}

#[async_trait]
impl ByteStore for MemoryStore {
  async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    Ok(self.inner().blobs.get(key).cloned())
  }

  async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
    self.inner().blobs.insert(key.to_string(), bytes.to_vec());
    Ok(())
  }

  async fn pin(&self, root: &str, keys: &[String]) -> Result<(), StoreError> {
    self
      .inner()
      .pins
      .insert(root.to_string(), keys.iter().cloned().collect());
    Ok(())
  }

  async fn unpin(&self, root: &str) -> Result<(), StoreError> {
    self.inner().pins.remove(root);
    Ok(())
  }
}
