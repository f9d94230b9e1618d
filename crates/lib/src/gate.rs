//! Process-wide bound on in-flight fetch attempts.
//!
//! The gate is an explicit, cloneable handle around a fair counting
//! semaphore. Clones share the same permits, so one gate constructed at
//! start-up and handed to every chain bounds fetches across all modules and
//! applications. Tests construct independent gates.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
  #[error("concurrency gate capacity must be at least 1")]
  ZeroCapacity,

  /// The gate was closed while waiting for a slot.
  #[error("concurrency gate is closed")]
  Closed,
}

/// A fixed-capacity counting gate.
///
/// Acquisition is FIFO-fair: waiters are granted slots in arrival order.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
  semaphore: Arc<Semaphore>,
  capacity: usize,
}

/// An acquired gate slot. The slot is released when this is dropped,
/// including when the owning future is cancelled.
#[derive(Debug)]
pub struct GatePermit {
  _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
  pub fn new(capacity: usize) -> Result<Self, GateError> {
    if capacity == 0 {
      return Err(GateError::ZeroCapacity);
    }
    Ok(Self {
      semaphore: Arc::new(Semaphore::new(capacity)),
      capacity,
    })
  }

  /// Wait for a free slot.
  pub async fn acquire(&self) -> Result<GatePermit, GateError> {
    trace!(available = self.available(), "waiting for gate slot");
    let permit = self.semaphore.clone().acquire_owned().await.map_err(|_| GateError::Closed)?;
    Ok(GatePermit { _permit: permit })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Number of slots currently free.
  pub fn available(&self) -> usize {
    self.semaphore.available_permits()
  }

  /// Close the gate. Pending and future acquisitions fail with [`GateError::Closed`];
  /// permits already held stay valid until dropped.
  pub fn close(&self) {
    self.semaphore.close();
  }

  pub fn is_closed(&self) -> bool {
    self.semaphore.is_closed()
  }
}
