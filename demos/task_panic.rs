use futures_alloter::{AllotError, CtrlAlloter, AllotOptions, Outcome, Task};
use std::io;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Panic Example ---");

  let alloter = CtrlAlloter::new(1, AllotOptions::new().name("panic")).expect("one worker is valid");

  let panicking = Task::new(async {
    info!("Panicking Task: Starting...");
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!("Panicking Task: About to panic!");
    panic!("This task is designed to panic!");
    #[allow(unreachable_code)]
    Ok::<(), io::Error>(())
  });
  let never_admitted = Task::from_fn(|| {
    info!("This task is never admitted.");
    Ok::<(), io::Error>(())
  });

  match alloter.exec(vec![panicking, never_admitted]).await {
    Outcome::Failed(AllotError::Panicked { message, .. }) => {
      info!("Batch correctly failed with a contained panic: {}", message);
    }
    other => info!("Unexpected outcome: {:?}", other),
  }
  info!("--- Task Panic Example End ---");
}
