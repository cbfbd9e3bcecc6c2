use crate::error::BoxError;

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

/// What a task body resolves to.
pub type TaskResult = Result<(), BoxError>;

type TaskBody = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, TaskResult> + Send + 'static>;

/// A unit of work: no inputs, resolves to success or a failure value.
///
/// A task is consumed by the alloter that runs it. Its body is only started if
/// the batch has not reached a terminal outcome by the time its unit runs.
/// Cancellation is cooperative: a body that is already running is never
/// interrupted, use [`Task::cancellable`] to observe the batch's token.
pub struct Task {
  body: TaskBody,
}

impl Task {
  /// Wraps a future.
  pub fn new<F, E>(future: F) -> Self
  where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    Self {
      body: Box::new(move |_token| future.map(|r| r.map_err(Into::into)).boxed()),
    }
  }

  /// Wraps a synchronous closure. It runs on the unit's executor thread when the
  /// unit is polled, so it should not block for long.
  pub fn from_fn<F, E>(f: F) -> Self
  where
    F: FnOnce() -> Result<(), E> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    Self {
      body: Box::new(move |_token| async move { f().map_err(Into::into) }.boxed()),
    }
  }

  /// Wraps a body that receives the batch's cancellation token.
  pub fn cancellable<F, Fut, E>(f: F) -> Self
  where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    Self {
      body: Box::new(move |token| f(token).map(|r| r.map_err(Into::into)).boxed()),
    }
  }

  pub(crate) fn into_future(self, token: CancellationToken) -> BoxFuture<'static, TaskResult> {
    (self.body)(token)
  }
}

impl fmt::Debug for Task {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task").finish_non_exhaustive()
  }
}
