use crate::error::SubmitError;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// A unit of work handed to a [`WorkerPool`].
pub type PoolUnit = BoxFuture<'static, ()>;

/// An execution capability a [`PooledAlloter`](crate::PooledAlloter) delegates to.
///
/// Implementations decide where units run. A unit dropped before it finishes
/// fails the batch that submitted it, unless that batch has already ended.
pub trait WorkerPool: Send + Sync {
  /// Hands a unit to the pool. An error fails the submitting batch.
  fn submit(&self, unit: PoolUnit) -> Result<(), SubmitError>;

  /// Stops accepting units. Must be safe to call more than once.
  fn release(&self);
}

/// Counts a unit as running until dropped, including when the unit panics.
struct RunningSlot(Arc<AtomicUsize>);

impl RunningSlot {
  fn enter(running: &Arc<AtomicUsize>) -> Self {
    running.fetch_add(1, AtomicOrdering::AcqRel);
    Self(running.clone())
  }
}

impl Drop for RunningSlot {
  fn drop(&mut self) {
    self.0.fetch_sub(1, AtomicOrdering::AcqRel);
  }
}

/// The pool an alloter builds for itself when none is supplied.
///
/// A dispatcher loop takes units off an unbounded queue and spawns each on the
/// runtime once a worker slot is free. Releasing cancels the dispatcher:
/// queued units are dropped, running units finish.
pub struct TokioWorkerPool {
  pool_name: Arc<String>,
  workers: usize,
  semaphore: Arc<Semaphore>,
  running: Arc<AtomicUsize>,
  unit_tx: mpsc::UnboundedSender<PoolUnit>,
  shutdown_token: CancellationToken,
  dispatcher_handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for TokioWorkerPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TokioWorkerPool")
      .field("pool_name", &self.pool_name)
      .field("workers", &self.workers)
      .field("running_units", &self.running_units())
      .field("released", &self.shutdown_token.is_cancelled())
      .finish()
  }
}

impl TokioWorkerPool {
  pub fn new(workers: usize, tokio_handle: TokioHandle, pool_name: &str) -> Arc<Self> {
    let workers = workers.max(1);
    let (unit_tx, unit_rx) = mpsc::unbounded_channel();
    let pool = Arc::new(Self {
      pool_name: Arc::new(pool_name.to_string()),
      workers,
      semaphore: Arc::new(Semaphore::new(workers)),
      running: Arc::new(AtomicUsize::new(0)),
      unit_tx,
      shutdown_token: CancellationToken::new(),
      dispatcher_handle: Mutex::new(None),
    });

    let dispatcher = tokio_handle.spawn(
      Self::run_dispatcher_loop(
        pool.pool_name.clone(),
        pool.semaphore.clone(),
        pool.running.clone(),
        unit_rx,
        tokio_handle.clone(),
        pool.shutdown_token.clone(),
      )
      .instrument(info_span!("worker_pool_dispatcher", name = %pool_name)),
    );
    *pool.dispatcher_handle.lock() = Some(dispatcher);
    pool
  }

  pub fn name(&self) -> &str {
    &self.pool_name
  }

  pub fn workers(&self) -> usize {
    self.workers
  }

  /// Units currently running.
  pub fn running_units(&self) -> usize {
    self.running.load(AtomicOrdering::Acquire)
  }

  pub fn is_released(&self) -> bool {
    self.shutdown_token.is_cancelled()
  }

  /// Releases the pool and waits for the dispatcher to stop.
  pub async fn shutdown(&self) {
    self.release();
    let handle = self.dispatcher_handle.lock().take();
    if let Some(handle) = handle {
      info!(pool_name = %self.pool_name, "Waiting for dispatcher loop to join.");
      if let Err(join_error) = handle.await {
        error!(pool_name = %self.pool_name, "Error joining dispatcher loop: {:?}", join_error);
      }
    } else {
      trace!(pool_name = %self.pool_name, "Dispatcher handle already taken.");
    }
  }

  async fn run_dispatcher_loop(
    pool_name: Arc<String>,
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    mut unit_rx: mpsc::UnboundedReceiver<PoolUnit>,
    units_tokio_handle: TokioHandle,
    shutdown_token: CancellationToken,
  ) {
    info!(name = %*pool_name, "Dispatcher loop started.");

    loop {
      tokio::select! {
        biased;

        _ = shutdown_token.cancelled() => {
          info!(name = %*pool_name, "Pool released. Dispatcher loop terminating.");
          break;
        }

        permit_result = semaphore.clone().acquire_owned() => {
          let permit = match permit_result {
            Ok(p) => p,
            Err(_) => {
              error!(name = %*pool_name, "Worker semaphore closed. Dispatcher loop exiting.");
              break;
            }
          };

          let unit = tokio::select! {
            biased;
            _ = shutdown_token.cancelled() => {
              info!(name = %*pool_name, "Pool released while holding a worker slot.");
              None
            }
            unit = unit_rx.recv() => unit,
          };

          match unit {
            Some(unit) => {
              trace!(name = %*pool_name, available = semaphore.available_permits(), "Dispatching unit to a worker slot.");
              let slot = RunningSlot::enter(&running);
              units_tokio_handle.spawn(async move {
                let _slot = slot;
                let _permit = permit;
                unit.await;
              });
            }
            None => {
              drop(permit);
              debug!(name = %*pool_name, "No further units will arrive. Dispatcher loop exiting.");
              break;
            }
          }
        }
      }
    }

    // Dropping the receiver drops every queued unit.
    let mut dropped = 0usize;
    unit_rx.close();
    while unit_rx.try_recv().is_ok() {
      dropped += 1;
    }
    if dropped > 0 {
      warn!(name = %*pool_name, dropped, "Dropped queued units on release.");
    }
    info!(name = %*pool_name, "Dispatcher loop stopped.");
  }
}

impl WorkerPool for TokioWorkerPool {
  fn submit(&self, unit: PoolUnit) -> Result<(), SubmitError> {
    if self.shutdown_token.is_cancelled() {
      warn!(pool_name = %self.pool_name, "Submit: pool is released.");
      return Err(SubmitError::Closed);
    }
    self.unit_tx.send(unit).map_err(|_| SubmitError::Closed)
  }

  fn release(&self) {
    if !self.shutdown_token.is_cancelled() {
      info!(pool_name = %self.pool_name, "Releasing worker pool.");
      self.shutdown_token.cancel();
    } else {
      trace!(pool_name = %self.pool_name, "Release: pool already released.");
    }
  }
}

impl Drop for TokioWorkerPool {
  fn drop(&mut self) {
    if !self.shutdown_token.is_cancelled() {
      debug!(pool_name = %*self.pool_name, "TokioWorkerPool dropped without release, releasing now.");
      self.shutdown_token.cancel();
    }
  }
}
