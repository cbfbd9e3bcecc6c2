use crate::batch::{Batch, Spawn};
use crate::error::AllotError;
use crate::options::{AllotOptions, Deadline};
use crate::outcome::Outcome;
use crate::permit::PermitSet;
use crate::task::Task;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info_span, trace, Instrument};

/// Runs a batch with at most `worker_count` tasks in flight.
///
/// Tasks are admitted in submission order. Before each admission the batch is
/// probed for a terminal outcome, so once a task fails, the deadline elapses
/// or the scope is cancelled no further task starts. Clones share the same
/// permits.
#[derive(Debug, Clone)]
pub struct CtrlAlloter {
  name: Arc<String>,
  deadline: Option<Deadline>,
  permits: PermitSet,
}

impl CtrlAlloter {
  /// Fails with [`AllotError::InvalidWorkerCount`] when `worker_count` is zero.
  pub fn new(worker_count: usize, options: AllotOptions) -> Result<Self, AllotError> {
    Ok(Self::with_permits(PermitSet::new(worker_count)?, options))
  }

  /// Bounds this alloter by an existing permit set, possibly shared.
  pub fn with_permits(permits: PermitSet, options: AllotOptions) -> Self {
    Self {
      name: options.name_or("ctrl_alloter"),
      deadline: options.deadline,
      permits,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn deadline(&self) -> Option<Deadline> {
    self.deadline
  }

  pub fn worker_count(&self) -> usize {
    self.permits.capacity()
  }

  pub fn permits(&self) -> &PermitSet {
    &self.permits
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
    if tasks.is_empty() {
      trace!(alloter = %self.name, "Empty batch, nothing to run.");
      return Outcome::Success;
    }

    let id = Batch::next_id();
    let span = info_span!(
      "allot_batch",
      alloter = %self.name,
      batch_id = id,
      tasks = tasks.len(),
      workers = self.permits.capacity()
    );
    Batch::new(id, scope, self.deadline, tasks)
      .run_admitted(&self.permits, &Spawn)
      .instrument(span)
      .await
  }
}
