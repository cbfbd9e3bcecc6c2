use thiserror::Error;

/// The failure value a task may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the alloters.
#[derive(Error, Debug)]
pub enum AllotError {
  #[error("Task failed: {0}")]
  Task(#[source] BoxError),

  #[error("Task panicked: {message}")]
  Panicked { message: String, stack_trace: String },

  #[error("Deadline exceeded before all tasks completed")]
  DeadlineExceeded,

  #[error("Invalid worker count {0}, at least one worker is required")]
  InvalidWorkerCount(usize),

  #[error("Worker pool is unavailable: {0}")]
  PoolUnavailable(String),

  #[error("Worker pool rejected a submission: {0}")]
  Submission(#[from] SubmitError),
}

impl AllotError {
  /// True for errors raised before any task could run.
  pub fn is_configuration(&self) -> bool {
    matches!(self, AllotError::InvalidWorkerCount(_) | AllotError::PoolUnavailable(_))
  }

  /// Returns the task's own failure value, if this error carries one.
  pub fn task_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
    match self {
      AllotError::Task(e) => Some(e.as_ref()),
      _ => None,
    }
  }
}

/// Errors a [`WorkerPool`](crate::WorkerPool) reports from `submit`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
  #[error("Worker pool is released or shutting down")]
  Closed,

  #[error("Worker pool rejected the unit: {0}")]
  Rejected(String),
}
