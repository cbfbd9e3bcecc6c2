mod common;

use common::{create_task, never_task, setup_tracing_for_test, Finish};
use futures_alloter::{AllotError, AllotOptions, CancellationToken, CtrlAlloter, Outcome, PermitSet, Task};
use rand::Rng;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[test]
fn test_zero_workers_rejected_at_construction() {
  match CtrlAlloter::new(0, AllotOptions::default()) {
    Err(err @ AllotError::InvalidWorkerCount(0)) => assert!(err.is_configuration()),
    other => panic!("Expected InvalidWorkerCount, got {:?}", other),
  }
}

#[tokio::test]
async fn test_empty_batch_succeeds_immediately() {
  setup_tracing_for_test();
  let alloter = CtrlAlloter::new(2, AllotOptions::default()).unwrap();
  assert!(alloter.exec(Vec::new()).await.is_success());
  assert_eq!(alloter.permits().available(), 2);
}

#[tokio::test]
async fn test_all_tasks_succeed_and_permits_return() {
  setup_tracing_for_test();
  let alloter = CtrlAlloter::new(2, AllotOptions::default()).unwrap();
  let tasks: Vec<Task> = (0..6).map(|i| create_task(i, 15, Finish::Succeed, None)).collect();

  let outcome = alloter.exec(tasks).await;
  assert!(outcome.is_success(), "got {:?}", outcome);

  sleep(Duration::from_millis(20)).await;
  assert_eq!(alloter.permits().available(), 2, "every permit must come back");
}

#[tokio::test]
async fn test_fail_fast_stops_admission() {
  setup_tracing_for_test();
  let alloter = CtrlAlloter::new(1, AllotOptions::default()).unwrap();
  let third_started = Arc::new(AtomicUsize::new(0));

  let tasks = vec![
    create_task(1, 50, Finish::Succeed, None),
    create_task(2, 0, Finish::Fail, None),
    create_task(3, 50, Finish::Succeed, Some(third_started.clone())),
  ];

  match alloter.exec(tasks).await {
    Outcome::Failed(AllotError::Task(e)) => assert_eq!(e.to_string(), "task 2 failed"),
    other => panic!("Expected failure of task 2, got {:?}", other),
  }

  sleep(Duration::from_millis(100)).await;
  assert_eq!(third_started.load(Ordering::SeqCst), 0, "task 3 must never be admitted");
  assert_eq!(alloter.permits().available(), 1);
}

#[tokio::test]
async fn test_failed_and_panicking_tasks_release_permits() {
  setup_tracing_for_test();
  let alloter = CtrlAlloter::new(2, AllotOptions::default()).unwrap();

  let outcome = alloter
    .exec(vec![create_task(1, 5, Finish::Panic, None), create_task(2, 5, Finish::Fail, None)])
    .await;
  assert!(matches!(outcome, Outcome::Failed(_)), "got {:?}", outcome);

  sleep(Duration::from_millis(30)).await;
  assert_eq!(alloter.permits().available(), 2);

  // The alloter stays usable after failures.
  let outcome = alloter.exec(vec![create_task(3, 5, Finish::Succeed, None)]).await;
  assert!(outcome.is_success());
}

#[tokio::test]
async fn test_permit_bound_is_never_exceeded() {
  setup_tracing_for_test();
  const WORKERS: usize = 3;
  let alloter = CtrlAlloter::new(WORKERS, AllotOptions::default()).unwrap();
  let running = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));

  let tasks: Vec<Task> = (0..12)
    .map(|_| {
      let running = running.clone();
      let peak = peak.clone();
      let duration_ms = rand::rng().random_range(5..25);
      Task::new(async move {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        sleep(Duration::from_millis(duration_ms)).await;
        running.fetch_sub(1, Ordering::SeqCst);
        Ok::<(), io::Error>(())
      })
    })
    .collect();

  let outcome = alloter.exec(tasks).await;
  assert!(outcome.is_success(), "got {:?}", outcome);
  let peak = peak.load(Ordering::SeqCst);
  assert!(peak <= WORKERS, "observed {} concurrent tasks with {} workers", peak, WORKERS);
  assert!(peak >= 2, "tasks should overlap, peak was {}", peak);
}

#[tokio::test]
async fn test_deadline_while_waiting_for_permit() {
  setup_tracing_for_test();
  let alloter = CtrlAlloter::new(1, AllotOptions::new().timeout(Duration::from_millis(50))).unwrap();
  let second_started = Arc::new(AtomicUsize::new(0));

  let start = Instant::now();
  let outcome = alloter
    .exec(vec![never_task(), create_task(2, 0, Finish::Succeed, Some(second_started.clone()))])
    .await;
  let elapsed = start.elapsed();

  assert!(matches!(outcome, Outcome::TimedOut), "got {:?}", outcome);
  assert!(elapsed >= Duration::from_millis(50), "timed out too early: {:?}", elapsed);
  assert!(elapsed < Duration::from_secs(1), "timed out too late: {:?}", elapsed);
  assert_eq!(second_started.load(Ordering::SeqCst), 0);
}

// A failure already queued when the deadline has passed is reported as a
// timeout: the deadline is checked first.
#[tokio::test]
async fn test_deadline_takes_priority_over_late_failure() {
  setup_tracing_for_test();
  let alloter = CtrlAlloter::new(1, AllotOptions::new().timeout(Duration::from_millis(30))).unwrap();

  let blocking_failure = Task::from_fn(|| {
    std::thread::sleep(Duration::from_millis(60));
    Err::<(), _>("failed after the deadline")
  });
  let outcome = alloter
    .exec(vec![blocking_failure, create_task(2, 0, Finish::Succeed, None)])
    .await;
  assert!(matches!(outcome, Outcome::TimedOut), "got {:?}", outcome);
}

#[tokio::test]
async fn test_cancellation_stops_admission() {
  setup_tracing_for_test();
  let alloter = CtrlAlloter::new(1, AllotOptions::default()).unwrap();
  let scope = CancellationToken::new();
  let started = Arc::new(AtomicUsize::new(0));

  let canceller = scope.clone();
  tokio::spawn(async move {
    sleep(Duration::from_millis(20)).await;
    canceller.cancel();
  });

  let tasks: Vec<Task> = (0..4)
    .map(|i| create_task(i, 60, Finish::Succeed, Some(started.clone())))
    .collect();
  let outcome = alloter.exec_with_scope(&scope, tasks).await;
  assert!(matches!(outcome, Outcome::Cancelled), "got {:?}", outcome);

  sleep(Duration::from_millis(150)).await;
  assert_eq!(started.load(Ordering::SeqCst), 1, "only the first task was admitted before cancellation");
}

#[tokio::test]
async fn test_shared_permits_bound_two_alloters() {
  setup_tracing_for_test();
  let permits = PermitSet::new(1).unwrap();
  let a = CtrlAlloter::with_permits(permits.clone(), AllotOptions::new().name("a"));
  let b = CtrlAlloter::with_permits(permits.clone(), AllotOptions::new().name("b"));
  let running = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));

  let make = |running: Arc<AtomicUsize>, peak: Arc<AtomicUsize>| {
    Task::new(async move {
      let now = running.fetch_add(1, Ordering::SeqCst) + 1;
      peak.fetch_max(now, Ordering::SeqCst);
      sleep(Duration::from_millis(20)).await;
      running.fetch_sub(1, Ordering::SeqCst);
      Ok::<(), io::Error>(())
    })
  };

  let (ra, rb) = tokio::join!(
    a.exec(vec![make(running.clone(), peak.clone()), make(running.clone(), peak.clone())]),
    b.exec(vec![make(running.clone(), peak.clone()), make(running.clone(), peak.clone())]),
  );
  assert!(ra.is_success() && rb.is_success());
  assert_eq!(peak.load(Ordering::SeqCst), 1);
  assert_eq!(a.worker_count(), 1);
}
