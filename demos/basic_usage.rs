use futures_alloter::{AllotOptions, Alloter, Outcome, Task};
use std::io;
use std::time::Duration;
use tracing::info;

async fn fetch(id: usize, delay_ms: u64) -> Result<(), io::Error> {
  info!("Fetch {} starting ({}ms).", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  info!("Fetch {} done.", id);
  Ok(())
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Usage Example ---");
  let alloter = Alloter::new(AllotOptions::new().timeout(Duration::from_secs(2)).name("basic"));

  let tasks: Vec<Task> = (0..4).map(|i| Task::new(fetch(i, 100 * (i as u64 + 1)))).collect();
  match alloter.exec(tasks).await {
    Outcome::Success => info!("All fetches succeeded."),
    other => info!("Batch ended with {:?}", other),
  }

  let failing = vec![
    Task::new(fetch(10, 300)),
    Task::from_fn(|| Err::<(), _>("bad input")),
  ];
  match alloter.exec(failing).await.into_result() {
    Ok(()) => info!("Unexpected success."),
    Err(e) => info!("Batch failed fast: {}", e),
  }
  info!("--- Basic Usage Example End ---");
}
