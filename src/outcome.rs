use crate::error::AllotError;
use crate::scope::Coordinator;

use tokio::sync::mpsc;
use tracing::debug;

/// The single terminal result of a batch.
#[derive(Debug)]
pub enum Outcome {
  /// Every task finished without a failure.
  Success,
  /// The first failure observed, a task error, a contained panic, or a
  /// submission/configuration error.
  Failed(AllotError),
  /// The deadline elapsed before every task finished.
  TimedOut,
  /// The caller's scope was cancelled. This is a request, not a fault.
  Cancelled,
}

impl Outcome {
  pub fn is_success(&self) -> bool {
    matches!(self, Outcome::Success)
  }

  /// True for `Failed` and `TimedOut`.
  pub fn is_terminal_error(&self) -> bool {
    matches!(self, Outcome::Failed(_) | Outcome::TimedOut)
  }

  pub fn error(&self) -> Option<&AllotError> {
    match self {
      Outcome::Failed(e) => Some(e),
      _ => None,
    }
  }

  /// `Success` and `Cancelled` map to `Ok(())`, a timeout to
  /// `Err(AllotError::DeadlineExceeded)`.
  pub fn into_result(self) -> Result<(), AllotError> {
    match self {
      Outcome::Success | Outcome::Cancelled => Ok(()),
      Outcome::Failed(e) => Err(e),
      Outcome::TimedOut => Err(AllotError::DeadlineExceeded),
    }
  }
}

/// Observes the deadline, the scope and the failure channel and decides the
/// batch outcome. Checks run in that priority order.
#[derive(Debug)]
pub(crate) struct Aggregator {
  coordinator: Coordinator,
  failures: mpsc::Receiver<AllotError>,
}

impl Aggregator {
  pub(crate) fn new(coordinator: Coordinator, failures: mpsc::Receiver<AllotError>) -> Self {
    Self { coordinator, failures }
  }

  /// Non-blocking: `None` while no terminal outcome is observable.
  pub(crate) fn probe(&mut self) -> Option<Outcome> {
    if self.coordinator.is_expired() {
      return Some(self.timed_out());
    }
    if self.coordinator.is_cancelled() {
      return Some(self.scope_raised());
    }
    match self.failures.try_recv() {
      Ok(err) => Some(self.failed(err)),
      Err(_) => None,
    }
  }

  /// Waits until a terminal outcome is observable.
  pub(crate) async fn wait(&mut self) -> Outcome {
    let coordinator = self.coordinator.clone();
    let outcome = tokio::select! {
      biased;
      _ = coordinator.expired() => None,
      _ = coordinator.token().cancelled() => Some(None),
      Some(err) = self.failures.recv() => Some(Some(err)),
    };
    match outcome {
      None => self.timed_out(),
      Some(None) => self.scope_raised(),
      Some(Some(err)) => self.failed(err),
    }
  }

  fn timed_out(&self) -> Outcome {
    debug!("Deadline elapsed, cancelling batch scope.");
    self.coordinator.cancel();
    Outcome::TimedOut
  }

  fn failed(&self, err: AllotError) -> Outcome {
    debug!(error = %err, "Failure observed, cancelling batch scope.");
    self.coordinator.cancel();
    Outcome::Failed(err)
  }

  // The scope is raised either by the caller or by the completion watcher.
  // Failures are reported before a unit's completion guard drops, so after
  // completion any failure is already queued.
  fn scope_raised(&mut self) -> Outcome {
    if self.coordinator.cancelled_externally() {
      debug!("Batch scope cancelled by caller.");
      return Outcome::Cancelled;
    }
    if self.coordinator.is_completed() {
      if let Ok(err) = self.failures.try_recv() {
        return self.failed(err);
      }
      return Outcome::Success;
    }
    Outcome::Cancelled
  }
}
