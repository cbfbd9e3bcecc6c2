use crate::error::{AllotError, SubmitError};
use crate::permit::Permit;
use crate::scope::{CompletionGuard, Coordinator};
use crate::task::Task;

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

thread_local! {
  static LAST_FAULT_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

lazy_static::lazy_static! {
  // Captures the stack at the panic site, then defers to the previous hook.
  static ref FAULT_TRACE_HOOK: () = {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
      let trace = Backtrace::force_capture().to_string();
      LAST_FAULT_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
      previous(info);
    }));
  };
}

/// The trace recorded by the panic hook on this thread. The hook runs on the
/// panicking thread before unwinding reaches `catch_unwind`, so the slot holds
/// the trace of the panic just caught. Falls back to the current stack if a
/// later hook replaced ours.
fn take_fault_trace() -> String {
  LAST_FAULT_TRACE
    .with(|slot| slot.borrow_mut().take())
    .unwrap_or_else(|| Backtrace::force_capture().to_string())
}

/// Everything a launched unit owns besides its task.
pub(crate) struct UnitContext {
  pub(crate) index: usize,
  pub(crate) coordinator: Coordinator,
  pub(crate) failures: mpsc::Sender<AllotError>,
  pub(crate) guard: CompletionGuard,
  pub(crate) permit: Option<Permit>,
}

/// Owns the unit's reporting handles. Fields drop in declaration order, so
/// the failure report always precedes completion and completion precedes
/// the permit release.
struct UnitSlot {
  index: usize,
  coordinator: Coordinator,
  settled: bool,
  failures: mpsc::Sender<AllotError>,
  _guard: CompletionGuard,
  _permit: Option<Permit>,
}

impl UnitSlot {
  fn settle(&mut self, failure: Option<AllotError>) {
    self.settled = true;
    if let Some(err) = failure {
      self.report(err);
    }
  }

  fn report(&self, err: AllotError) {
    // Sized to the batch, so only a departed receiver can refuse the send.
    if let Err(e) = self.failures.try_send(err) {
      debug!(task_index = self.index, "Failure could not be reported, batch already finished: {}", e);
    }
  }
}

impl Drop for UnitSlot {
  fn drop(&mut self) {
    // Dropped before settling: the pool discarded the unit. With the batch
    // still live that is a failure, not a finished task.
    if !self.settled && !self.coordinator.is_cancelled() {
      warn!(task_index = self.index, "Unit dropped before its task finished.");
      self.report(AllotError::Submission(SubmitError::Closed));
    }
  }
}

/// Wraps one task into a unit that never panics.
///
/// The body is skipped if the batch scope is already raised when the unit
/// starts. A returned error or a panic is reported at most once on the failure
/// channel, and so is a unit dropped unfinished while the batch is live. The
/// completion guard drops after the report and the permit after the guard, on
/// every path.
pub(crate) fn wrap(task: Task, ctx: UnitContext) -> BoxFuture<'static, ()> {
  lazy_static::initialize(&FAULT_TRACE_HOOK);

  let UnitContext {
    index,
    coordinator,
    failures,
    guard,
    permit,
  } = ctx;
  let mut slot = UnitSlot {
    index,
    coordinator,
    settled: false,
    failures,
    _guard: guard,
    _permit: permit,
  };

  async move {
    if slot.coordinator.is_cancelled() {
      trace!(task_index = index, "Batch scope already raised, skipping task body.");
      slot.settle(None);
      return;
    }

    let token = slot.coordinator.token().clone();
    let body = AssertUnwindSafe(async move { task.into_future(token).await });
    let failure = match body.catch_unwind().await {
      Ok(Ok(())) => {
        trace!(task_index = index, "Task completed successfully.");
        None
      }
      Ok(Err(e)) => {
        trace!(task_index = index, error = %e, "Task returned a failure.");
        Some(AllotError::Task(e))
      }
      Err(payload) => {
        let stack_trace = take_fault_trace();
        let message = panic_message(&*payload);
        error!(task_index = index, %message, "Task panicked during execution.");
        Some(AllotError::Panicked { message, stack_trace })
      }
    };
    slot.settle(failure);
  }
  .boxed()
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(s) = payload.downcast_ref::<&str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
