#![allow(dead_code)]

use futures_alloter::Task;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
  Succeed,
  Fail,
  Panic,
}

// Helper to create a task that sleeps, then finishes as requested. `started`
// counts bodies that actually began running.
pub fn create_task(task_id_for_log: usize, duration_ms: u64, finish: Finish, started: Option<Arc<AtomicUsize>>) -> Task {
  Task::new(async move {
    if let Some(counter) = started {
      counter.fetch_add(1, Ordering::SeqCst);
    }
    tracing::info!("Task {} starting, will take {}ms.", task_id_for_log, duration_ms);
    sleep(Duration::from_millis(duration_ms)).await;
    match finish {
      Finish::Succeed => {
        tracing::info!("Task {} completed successfully.", task_id_for_log);
        Ok(())
      }
      Finish::Fail => {
        tracing::info!("Task {} failing as requested.", task_id_for_log);
        Err(io::Error::new(io::ErrorKind::Other, format!("task {} failed", task_id_for_log)))
      }
      Finish::Panic => {
        tracing::info!("Task {} panicking as requested.", task_id_for_log);
        panic!("Task {} intentionally panicked!", task_id_for_log);
      }
    }
  })
}

// A task that never completes on its own.
pub fn never_task() -> Task {
  Task::new(async {
    std::future::pending::<()>().await;
    Ok::<(), io::Error>(())
  })
}

// Helper to initialize tracing for tests (call once per test run, not per test function)
pub fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,futures_alloter=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}
