use futures_alloter::{AllotOptions, PoolUnit, PooledAlloter, SubmitError, Task, TokioWorkerPool, WorkerPool};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Counts submissions before handing units to a shared Tokio pool.
struct CountingPool {
  inner: Arc<TokioWorkerPool>,
  submitted: AtomicUsize,
}

impl WorkerPool for CountingPool {
  fn submit(&self, unit: PoolUnit) -> Result<(), SubmitError> {
    self.submitted.fetch_add(1, Ordering::Relaxed);
    self.inner.submit(unit)
  }

  fn release(&self) {
    self.inner.release();
  }
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Custom Pool Example ---");

  let shared = Arc::new(CountingPool {
    inner: TokioWorkerPool::new(4, tokio::runtime::Handle::current(), "shared_pool"),
    submitted: AtomicUsize::new(0),
  });
  let alloter = PooledAlloter::new(4, AllotOptions::new().timeout(Duration::from_secs(1))).with_pool(shared.clone());

  for round in 0..2 {
    let tasks: Vec<Task> = (0..6)
      .map(|i| {
        Task::new(async move {
          tokio::time::sleep(Duration::from_millis(50)).await;
          info!("Round {} task {} done.", round, i);
          Ok::<(), io::Error>(())
        })
      })
      .collect();
    let outcome = alloter.exec(tasks).await;
    info!("Round {} outcome: {:?}", round, outcome);
  }

  // The pool was borrowed, so it is still ours to release.
  info!("Submitted {} units in total.", shared.submitted.load(Ordering::Relaxed));
  shared.inner.shutdown().await;
  info!("--- Custom Pool Example End ---");
}
