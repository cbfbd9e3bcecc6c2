use futures_alloter::{AllotOptions, CtrlAlloter, Task};
use std::io;
use std::time::{Duration, Instant};
use tracing::info;

async fn long_task_fn(id: usize) -> Result<(), io::Error> {
  info!("Task {} starting (concurrency test - should take 1s)", id);
  tokio::time::sleep(Duration::from_secs(1)).await;
  info!("Task {} finished", id);
  Ok(())
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Concurrency Limit Example (Limit: 2) ---");

  let concurrency_limit = 2;
  let alloter = match CtrlAlloter::new(concurrency_limit, AllotOptions::new().name("concurrency")) {
    Ok(alloter) => alloter,
    Err(e) => {
      tracing::error!("Invalid configuration: {}", e);
      return;
    }
  };

  let num_tasks = 5;
  info!(
    "Submitting {} tasks, each takes 1 sec. With concurrency {}, this should take ~{} secs.",
    num_tasks,
    concurrency_limit,
    (num_tasks as f32 / concurrency_limit as f32).ceil()
  );

  let start = Instant::now();
  let tasks: Vec<Task> = (0..num_tasks).map(|i| Task::new(long_task_fn(i))).collect();
  let outcome = alloter.exec(tasks).await;
  info!("Batch outcome {:?} after {:?}.", outcome, start.elapsed());
  info!("--- Concurrency Limit Example End ---");
}
