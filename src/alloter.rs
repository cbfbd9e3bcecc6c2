use crate::batch::{Batch, Spawn};
use crate::options::{AllotOptions, Deadline};
use crate::outcome::Outcome;
use crate::task::Task;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info_span, trace, Instrument};

/// Runs every task of a batch at once, without a concurrency cap.
///
/// Nothing is checked before launching, so when an early task fails the later
/// ones may still start. Units whose body has not begun when the batch ends are
/// skipped.
#[derive(Debug, Clone)]
pub struct Alloter {
  name: Arc<String>,
  deadline: Option<Deadline>,
}

impl Default for Alloter {
  fn default() -> Self {
    Self::new(AllotOptions::default())
  }
}

impl Alloter {
  pub fn new(options: AllotOptions) -> Self {
    Self {
      name: options.name_or("alloter"),
      deadline: options.deadline,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn deadline(&self) -> Option<Deadline> {
    self.deadline
  }

  /// Runs `tasks` concurrently until all succeed, one fails or the deadline elapses.
  pub async fn exec<I>(&self, tasks: I) -> Outcome
  where
    I: IntoIterator<Item = Task>,
  {
    self.exec_with_scope(&CancellationToken::new(), tasks).await
  }

  /// Like [`exec`](Self::exec), also ending with [`Outcome::Cancelled`] when
  /// `scope` is cancelled. Cancelling the batch never cancels `scope`.
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
    let span = info_span!("allot_batch", alloter = %self.name, batch_id = id, tasks = tasks.len());
    Batch::new(id, scope, self.deadline, tasks)
      .run_unbounded(&Spawn)
      .instrument(span)
      .await
  }
}
