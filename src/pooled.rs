use crate::batch::{Batch, Launch};
use crate::error::AllotError;
use crate::options::{AllotOptions, Deadline};
use crate::outcome::Outcome;
use crate::permit::PermitSet;
use crate::pool::{PoolUnit, TokioWorkerPool, WorkerPool};
use crate::task::Task;

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, trace, Instrument};

/// Builds the pool an alloter owns from the resolved worker count.
pub type PoolFactory = Arc<dyn Fn(usize) -> Result<Arc<dyn WorkerPool>, String> + Send + Sync>;

enum PoolSource {
  /// Built by the alloter, released at the end of every exec.
  Owned(PoolFactory),
  /// Supplied by the caller, never released implicitly.
  Borrowed(Arc<dyn WorkerPool>),
}

impl Clone for PoolSource {
  fn clone(&self) -> Self {
    match self {
      PoolSource::Owned(factory) => PoolSource::Owned(factory.clone()),
      PoolSource::Borrowed(pool) => PoolSource::Borrowed(pool.clone()),
    }
  }
}

#[derive(Debug)]
struct PoolConfig {
  workers: usize,
  permits: PermitSet,
}

struct PoolLauncher<'a> {
  pool: &'a dyn WorkerPool,
}

impl Launch for PoolLauncher<'_> {
  fn launch(&self, unit: PoolUnit) -> Result<(), AllotError> {
    self.pool.submit(unit).map_err(AllotError::from)
  }
}

/// Releases an owned pool when the exec ends, however it ends.
struct ReleaseOnDrop(Option<Arc<dyn WorkerPool>>);

impl Drop for ReleaseOnDrop {
  fn drop(&mut self) {
    if let Some(pool) = self.0.take() {
      pool.release();
    }
  }
}

/// Admission-controlled alloter that hands units to a [`WorkerPool`] instead
/// of spawning them.
///
/// Configuration is validated lazily, once, on the first exec. If that fails
/// every exec on this instance returns [`AllotError::PoolUnavailable`] without
/// running anything. An owned pool lives for a single exec. A borrowed pool
/// (see [`with_pool`](Self::with_pool)) stays the caller's to release.
pub struct PooledAlloter {
  name: Arc<String>,
  deadline: Option<Deadline>,
  worker_count: usize,
  source: PoolSource,
  init: OnceLock<Result<PoolConfig, String>>,
  owned_pool: Mutex<Option<Arc<dyn WorkerPool>>>,
}

impl fmt::Debug for PooledAlloter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PooledAlloter")
      .field("name", &self.name)
      .field("deadline", &self.deadline)
      .field("worker_count", &self.worker_count)
      .field("borrowed_pool", &matches!(self.source, PoolSource::Borrowed(_)))
      .field("initialized", &self.init.get().map(|r| r.is_ok()))
      .finish()
  }
}

/// Does not carry over the initialization state nor an owned pool instance.
impl Clone for PooledAlloter {
  fn clone(&self) -> Self {
    Self {
      name: self.name.clone(),
      deadline: self.deadline,
      worker_count: self.worker_count,
      source: self.source.clone(),
      init: OnceLock::new(),
      owned_pool: Mutex::new(None),
    }
  }
}

impl PooledAlloter {
  /// `worker_count == 0` selects twice the available parallelism. The pool is
  /// a [`TokioWorkerPool`] on the runtime the first exec runs on.
  pub fn new(worker_count: usize, options: AllotOptions) -> Self {
    let pool_name = options.name_or("pooled_alloter");
    let factory_name = pool_name.clone();
    let factory: PoolFactory = Arc::new(move |workers| {
      let handle = TokioHandle::try_current().map_err(|e| format!("no Tokio runtime available: {}", e))?;
      let pool: Arc<dyn WorkerPool> = TokioWorkerPool::new(workers, handle, &factory_name);
      Ok(pool)
    });
    Self::from_source(worker_count, pool_name, options.deadline, PoolSource::Owned(factory))
  }

  /// Owns pools built by `factory`.
  pub fn with_factory<F>(worker_count: usize, options: AllotOptions, factory: F) -> Self
  where
    F: Fn(usize) -> Result<Arc<dyn WorkerPool>, String> + Send + Sync + 'static,
  {
    let name = options.name_or("pooled_alloter");
    Self::from_source(worker_count, name, options.deadline, PoolSource::Owned(Arc::new(factory)))
  }

  /// Returns a clone that delegates to `pool`, which the caller keeps owning.
  pub fn with_pool(&self, pool: Arc<dyn WorkerPool>) -> Self {
    let mut alloter = self.clone();
    alloter.source = PoolSource::Borrowed(pool);
    alloter
  }

  fn from_source(worker_count: usize, name: Arc<String>, deadline: Option<Deadline>, source: PoolSource) -> Self {
    Self {
      name,
      deadline,
      worker_count,
      source,
      init: OnceLock::new(),
      owned_pool: Mutex::new(None),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn deadline(&self) -> Option<Deadline> {
    self.deadline
  }

  /// The resolved worker count, once initialized.
  pub fn worker_count(&self) -> Option<usize> {
    self.init.get().and_then(|r| r.as_ref().ok()).map(|c| c.workers)
  }

  /// Releases the owned pool, if one is alive. Idempotent, and a no-op for a
  /// borrowed pool.
  pub fn release(&self) {
    if let Some(pool) = self.owned_pool.lock().take() {
      debug!(alloter = %self.name, "Releasing owned worker pool.");
      pool.release();
    }
  }

  pub async fn exec<I>(&self, tasks: I) -> Outcome
  where
    I: IntoIterator<Item = Task>,
  {
    self.exec_with_scope(&CancellationToken::new(), tasks).await
  }

  pub async fn exec_with_scope<I>(&self, scope: &CancellationToken, tasks: I) -> Outcome
  where
    I: IntoIterator<Item = Task>,
  {
    let tasks: Vec<Task> = tasks.into_iter().collect();

    let config = match self.init.get_or_init(|| self.initialize()) {
      Ok(config) => config,
      Err(msg) => return Outcome::Failed(AllotError::PoolUnavailable(msg.clone())),
    };

    if tasks.is_empty() {
      trace!(alloter = %self.name, "Empty batch, nothing to run.");
      self.release();
      return Outcome::Success;
    }

    let (pool, _release) = match &self.source {
      PoolSource::Borrowed(pool) => (pool.clone(), ReleaseOnDrop(None)),
      PoolSource::Owned(factory) => {
        let existing = self.owned_pool.lock().take();
        let pool = match existing {
          Some(pool) => pool,
          None => match factory(config.workers) {
            Ok(pool) => pool,
            Err(msg) => {
              error!(alloter = %self.name, "Failed to build worker pool: {}", msg);
              return Outcome::Failed(AllotError::PoolUnavailable(msg));
            }
          },
        };
        (pool.clone(), ReleaseOnDrop(Some(pool)))
      }
    };

    let id = Batch::next_id();
    let span = info_span!(
      "allot_batch",
      alloter = %self.name,
      batch_id = id,
      tasks = tasks.len(),
      workers = config.workers
    );
    let launcher = PoolLauncher { pool: &*pool };
    Batch::new(id, scope, self.deadline, tasks)
      .run_admitted(&config.permits, &launcher)
      .instrument(span)
      .await
  }

  fn initialize(&self) -> Result<PoolConfig, String> {
    let workers = if self.worker_count == 0 {
      default_workers()
    } else {
      self.worker_count
    };
    let permits = PermitSet::new(workers).map_err(|e| e.to_string())?;

    if let PoolSource::Owned(factory) = &self.source {
      match factory(workers) {
        Ok(pool) => *self.owned_pool.lock() = Some(pool),
        Err(msg) => {
          error!(alloter = %self.name, "Worker pool initialization failed: {}", msg);
          return Err(msg);
        }
      }
    }
    debug!(alloter = %self.name, workers, "Pooled alloter initialized.");
    Ok(PoolConfig { workers, permits })
  }
}

fn default_workers() -> usize {
  std::thread::available_parallelism()
    .map(|n| n.get())
    .unwrap_or(1)
    << 1
}
