use crate::alloter::Alloter;
use crate::ctrl::CtrlAlloter;
use crate::options::Deadline;
use crate::outcome::Outcome;
use crate::pooled::PooledAlloter;
use crate::task::Task;
use crate::wrapper::panic_message;

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Common surface of the alloters, for code generic over the launch strategy.
#[async_trait]
pub trait Executor: Send + Sync {
  async fn exec_with_scope(&self, scope: &CancellationToken, tasks: Vec<Task>) -> Outcome;

  async fn exec(&self, tasks: Vec<Task>) -> Outcome {
    self.exec_with_scope(&CancellationToken::new(), tasks).await
  }

  fn deadline(&self) -> Option<Deadline>;
}

#[async_trait]
impl Executor for Alloter {
  async fn exec_with_scope(&self, scope: &CancellationToken, tasks: Vec<Task>) -> Outcome {
    Alloter::exec_with_scope(self, scope, tasks).await
  }

  fn deadline(&self) -> Option<Deadline> {
    Alloter::deadline(self)
  }
}

#[async_trait]
impl Executor for CtrlAlloter {
  async fn exec_with_scope(&self, scope: &CancellationToken, tasks: Vec<Task>) -> Outcome {
    CtrlAlloter::exec_with_scope(self, scope, tasks).await
  }

  fn deadline(&self) -> Option<Deadline> {
    CtrlAlloter::deadline(self)
  }
}

#[async_trait]
impl Executor for PooledAlloter {
  async fn exec_with_scope(&self, scope: &CancellationToken, tasks: Vec<Task>) -> Outcome {
    PooledAlloter::exec_with_scope(self, scope, tasks).await
  }

  fn deadline(&self) -> Option<Deadline> {
    PooledAlloter::deadline(self)
  }
}

/// Runs every task to completion and reports whether all of them succeeded.
///
/// Unlike the alloters this never returns early: there is no deadline and a
/// failure does not stop the others. Panics are logged and count as failures.
pub async fn join_all<I>(tasks: I) -> bool
where
  I: IntoIterator<Item = Task>,
{
  let handles: Vec<_> = tasks
    .into_iter()
    .enumerate()
    .map(|(index, task)| {
      tokio::spawn(async move {
        let token = CancellationToken::new();
        match AssertUnwindSafe(async move { task.into_future(token).await })
          .catch_unwind()
          .await
        {
          Ok(Ok(())) => true,
          Ok(Err(e)) => {
            debug!(task_index = index, error = %e, "join_all: task failed.");
            false
          }
          Err(payload) => {
            error!(task_index = index, message = %panic_message(&*payload), "join_all: task panicked.");
            false
          }
        }
      })
    })
    .collect();

  let mut all_ok = true;
  for handle in handles {
    match handle.await {
      Ok(ok) => all_ok &= ok,
      Err(join_error) => {
        error!("join_all: task unit could not be joined: {:?}", join_error);
        all_ok = false;
      }
    }
  }
  all_ok
}
