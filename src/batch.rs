use crate::error::AllotError;
use crate::options::Deadline;
use crate::outcome::{Aggregator, Outcome};
use crate::permit::{Permit, PermitSet};
use crate::scope::{CompletionWatch, Coordinator};
use crate::task::Task;
use crate::wrapper::{wrap, UnitContext};

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_BATCH_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// How a wrapped unit gets executed.
pub(crate) trait Launch {
  fn launch(&self, unit: BoxFuture<'static, ()>) -> Result<(), AllotError>;
}

/// Runs each unit as its own Tokio task.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Spawn;

impl Launch for Spawn {
  fn launch(&self, unit: BoxFuture<'static, ()>) -> Result<(), AllotError> {
    tokio::spawn(unit.in_current_span());
    Ok(())
  }
}

/// One exec call: its scope, failure channel and completion watch.
pub(crate) struct Batch {
  pub(crate) id: u64,
  coordinator: Coordinator,
  failures: mpsc::Sender<AllotError>,
  aggregator: Aggregator,
  watch: CompletionWatch,
  tasks: Vec<Task>,
}

impl Batch {
  pub(crate) fn next_id() -> u64 {
    NEXT_BATCH_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
  }

  pub(crate) fn new(id: u64, parent: &CancellationToken, deadline: Option<Deadline>, tasks: Vec<Task>) -> Self {
    let coordinator = Coordinator::new(parent, deadline.map(|d| d.resolve(Instant::now())));
    // One slot per task: every unit reports at most once, so sends never wait.
    let (failures, failures_rx) = mpsc::channel(tasks.len().max(1));
    Self {
      id,
      aggregator: Aggregator::new(coordinator.clone(), failures_rx),
      coordinator,
      failures,
      watch: CompletionWatch::new(),
      tasks,
    }
  }

  fn unit(&self, index: usize, task: Task, permit: Option<Permit>) -> BoxFuture<'static, ()> {
    wrap(
      task,
      UnitContext {
        index,
        coordinator: self.coordinator.clone(),
        failures: self.failures.clone(),
        guard: self.watch.guard(),
        permit,
      },
    )
  }

  /// Launches every task immediately, then waits.
  pub(crate) async fn run_unbounded(mut self, launcher: &impl Launch) -> Outcome {
    let tasks = std::mem::take(&mut self.tasks);
    for (index, task) in tasks.into_iter().enumerate() {
      let unit = self.unit(index, task, None);
      if let Err(e) = launcher.launch(unit) {
        warn!(batch_id = self.id, task_index = index, "Launch failed: {}", e);
        self.coordinator.cancel();
        return Outcome::Failed(e);
      }
    }
    self.finish().await
  }

  /// Admits tasks in order, one permit each, checking for a terminal outcome
  /// before every launch. Stops admitting on the first terminal outcome.
  pub(crate) async fn run_admitted(mut self, permits: &PermitSet, launcher: &impl Launch) -> Outcome {
    let tasks = std::mem::take(&mut self.tasks);
    for (index, task) in tasks.into_iter().enumerate() {
      let permit = tokio::select! {
        biased;
        _ = self.coordinator.halted() => None,
        acquired = permits.acquire() => match acquired {
          Ok(p) => Some(p),
          Err(_) => {
            warn!(batch_id = self.id, "Permit set closed unexpectedly.");
            self.coordinator.cancel();
            return Outcome::Failed(AllotError::PoolUnavailable("permit set closed".to_string()));
          }
        },
      };
      trace!(batch_id = self.id, task_index = index, available = permits.available(), "Permit wait finished.");

      // halted() only resolves on a deadline or a raised scope, both of which
      // the probe reports.
      let Some(permit) = permit else {
        debug!(batch_id = self.id, task_index = index, "Batch halted while waiting for a permit.");
        return self.aggregator.probe().unwrap_or(Outcome::Cancelled);
      };
      if let Some(outcome) = self.aggregator.probe() {
        debug!(batch_id = self.id, task_index = index, "Terminal outcome before admission, not admitting remaining tasks.");
        drop(permit);
        return outcome;
      }

      let unit = self.unit(index, task, Some(permit));
      if let Err(e) = launcher.launch(unit) {
        warn!(batch_id = self.id, task_index = index, "Launch failed: {}", e);
        self.coordinator.cancel();
        return Outcome::Failed(e);
      }
    }
    self.finish().await
  }

  async fn finish(self) -> Outcome {
    let Batch {
      id,
      coordinator,
      failures,
      mut aggregator,
      watch,
      ..
    } = self;
    drop(failures);
    watch.spawn_watcher(coordinator);
    let outcome = aggregator.wait().await;
    debug!(batch_id = id, ?outcome, "Batch reached terminal outcome.");
    outcome
  }
}
