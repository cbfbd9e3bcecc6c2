use crate::error::AllotError;

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// A fixed-capacity set of admission permits.
///
/// Cloning yields another handle to the same permits, so several alloters can
/// share one concurrency bound.
#[derive(Debug, Clone)]
pub struct PermitSet {
  semaphore: Arc<Semaphore>,
  capacity: usize,
}

/// Held by a running unit; returns its slot on drop.
pub(crate) type Permit = OwnedSemaphorePermit;

impl PermitSet {
  /// Creates a set of `capacity` permits. Zero is rejected.
  pub fn new(capacity: usize) -> Result<Self, AllotError> {
    if capacity == 0 {
      return Err(AllotError::InvalidWorkerCount(capacity));
    }
    Ok(Self {
      semaphore: Arc::new(Semaphore::new(capacity)),
      capacity,
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Permits currently free.
  pub fn available(&self) -> usize {
    self.semaphore.available_permits()
  }

  pub(crate) async fn acquire(&self) -> Result<Permit, AcquireError> {
    self.semaphore.clone().acquire_owned().await
  }
}
