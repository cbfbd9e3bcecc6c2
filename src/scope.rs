use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// The per-exec cancellation scope and deadline.
///
/// The scope's token is a child of the caller's token: cancelling the caller
/// cancels the batch, cancelling the batch leaves the caller untouched. An
/// elapsed deadline halts admission exactly like a cancellation but is
/// reported as a timeout.
#[derive(Debug, Clone)]
pub(crate) struct Coordinator {
  parent: CancellationToken,
  token: CancellationToken,
  deadline: Option<Instant>,
  completed: Arc<AtomicBool>,
}

impl Coordinator {
  pub(crate) fn new(parent: &CancellationToken, deadline: Option<Instant>) -> Self {
    Self {
      parent: parent.clone(),
      token: parent.child_token(),
      deadline,
      completed: Arc::new(AtomicBool::new(false)),
    }
  }

  pub(crate) fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Idempotent.
  pub(crate) fn cancel(&self) {
    self.token.cancel();
  }

  /// `None` when there is no deadline.
  pub(crate) fn time_remaining(&self) -> Option<Duration> {
    self
      .deadline
      .map(|at| at.saturating_duration_since(Instant::now()))
  }

  pub(crate) fn is_expired(&self) -> bool {
    self.deadline.is_some_and(|at| Instant::now() >= at)
  }

  /// True if the caller's scope, not this batch, raised the cancellation.
  pub(crate) fn cancelled_externally(&self) -> bool {
    self.parent.is_cancelled()
  }

  pub(crate) fn is_completed(&self) -> bool {
    self.completed.load(Ordering::Acquire)
  }

  /// Marks every admitted task as finished and raises the scope.
  pub(crate) fn complete(&self) {
    self.completed.store(true, Ordering::Release);
    self.token.cancel();
  }

  pub(crate) fn token(&self) -> &CancellationToken {
    &self.token
  }

  /// Resolves once the deadline elapses. Never resolves without a deadline.
  pub(crate) async fn expired(&self) {
    match self.deadline {
      Some(at) => tokio::time::sleep_until(at).await,
      None => std::future::pending::<()>().await,
    }
  }

  /// Resolves on deadline or cancellation, whichever comes first.
  pub(crate) async fn halted(&self) {
    tokio::select! {
      biased;
      _ = self.expired() => {}
      _ = self.token.cancelled() => {}
    }
  }
}

/// Held by every launched unit until it finishes, dropped or not.
#[derive(Debug)]
pub(crate) struct CompletionGuard {
  _tx: mpsc::Sender<()>,
}

/// Counts outstanding units through sender liveness: the receiver yields
/// `None` once every guard is gone.
#[derive(Debug)]
pub(crate) struct CompletionWatch {
  tx: mpsc::Sender<()>,
  rx: mpsc::Receiver<()>,
}

impl CompletionWatch {
  pub(crate) fn new() -> Self {
    let (tx, rx) = mpsc::channel(1);
    Self { tx, rx }
  }

  pub(crate) fn guard(&self) -> CompletionGuard {
    CompletionGuard { _tx: self.tx.clone() }
  }

  /// Starts the background watcher. Call only after admission is over.
  pub(crate) fn spawn_watcher(self, coordinator: Coordinator) {
    let CompletionWatch { tx, mut rx } = self;
    drop(tx);
    tokio::spawn(async move {
      while rx.recv().await.is_some() {}
      trace!("All admitted units finished, raising completion.");
      coordinator.complete();
    });
  }
}
