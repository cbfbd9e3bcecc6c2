mod common;

use common::setup_tracing_for_test;
use futures::FutureExt;
use futures_alloter::{SubmitError, TokioWorkerPool, WorkerPool};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
  fn drop(&mut self) {
    self.0.store(true, Ordering::SeqCst);
  }
}

#[tokio::test]
async fn test_units_run_on_the_pool() {
  setup_tracing_for_test();
  let pool = TokioWorkerPool::new(2, tokio::runtime::Handle::current(), "test_pool_basic");
  let done = Arc::new(AtomicUsize::new(0));

  for _ in 0..4 {
    let done = done.clone();
    pool
      .submit(
        async move {
          sleep(Duration::from_millis(10)).await;
          done.fetch_add(1, Ordering::SeqCst);
        }
        .boxed(),
      )
      .unwrap();
  }

  sleep(Duration::from_millis(100)).await;
  assert_eq!(done.load(Ordering::SeqCst), 4);
  assert_eq!(pool.running_units(), 0);
  pool.shutdown().await;
}

#[tokio::test]
async fn test_concurrency_limit_and_queuing() {
  setup_tracing_for_test();
  let pool = TokioWorkerPool::new(1, tokio::runtime::Handle::current(), "test_pool_concurrency");
  let completion_order = Arc::new(parking_lot::Mutex::new(Vec::new()));

  for unit_id in 1..=3 {
    let completion_order_clone = completion_order.clone();
    pool
      .submit(
        async move {
          // Later units are shorter, only queuing keeps them in order.
          sleep(Duration::from_millis(60 - unit_id * 15)).await;
          completion_order_clone.lock().push(unit_id);
        }
        .boxed(),
      )
      .unwrap();
  }

  sleep(Duration::from_millis(10)).await;
  assert_eq!(pool.running_units(), 1);

  sleep(Duration::from_millis(200)).await;
  assert_eq!(*completion_order.lock(), vec![1, 2, 3], "units must run one at a time in submission order");
  pool.shutdown().await;
}

#[tokio::test]
async fn test_release_drops_queued_units_and_rejects_new_ones() {
  setup_tracing_for_test();
  let pool = TokioWorkerPool::new(1, tokio::runtime::Handle::current(), "test_pool_release");
  let first_finished = Arc::new(AtomicBool::new(false));
  let queued_dropped = Arc::new(AtomicBool::new(false));
  let queued_ran = Arc::new(AtomicBool::new(false));

  let flag = first_finished.clone();
  pool
    .submit(
      async move {
        sleep(Duration::from_millis(80)).await;
        flag.store(true, Ordering::SeqCst);
      }
      .boxed(),
    )
    .unwrap();

  let guard = DropFlag(queued_dropped.clone());
  let ran = queued_ran.clone();
  pool
    .submit(
      async move {
        let _guard = guard;
        ran.store(true, Ordering::SeqCst);
      }
      .boxed(),
    )
    .unwrap();

  sleep(Duration::from_millis(20)).await;
  pool.release();
  pool.release();
  assert!(pool.is_released());

  assert_eq!(pool.submit(async {}.boxed()), Err(SubmitError::Closed));

  pool.shutdown().await;
  sleep(Duration::from_millis(120)).await;
  assert!(first_finished.load(Ordering::SeqCst), "running units finish after release");
  assert!(!queued_ran.load(Ordering::SeqCst), "queued units never start after release");
  assert!(queued_dropped.load(Ordering::SeqCst), "queued units are dropped on release");
}

#[tokio::test]
async fn test_drop_behavior_releases_pool() {
  setup_tracing_for_test();
  let pool = TokioWorkerPool::new(1, tokio::runtime::Handle::current(), "test_pool_drop");
  assert_eq!(pool.name(), "test_pool_drop");
  assert_eq!(pool.workers(), 1);
  let pool_dyn: Arc<dyn WorkerPool> = pool;
  drop(pool_dyn);
  // Nothing to observe besides not hanging; the dispatcher sees the
  // cancelled token and exits.
  sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_panicking_unit_frees_its_slot() {
  setup_tracing_for_test();
  let pool = TokioWorkerPool::new(1, tokio::runtime::Handle::current(), "test_pool_panic");
  let after_panic_ran = Arc::new(AtomicBool::new(false));

  pool
    .submit(
      async {
        sleep(Duration::from_millis(5)).await;
        panic!("foreign unit panicked");
      }
      .boxed(),
    )
    .unwrap();
  let ran = after_panic_ran.clone();
  pool
    .submit(
      async move {
        ran.store(true, Ordering::SeqCst);
      }
      .boxed(),
    )
    .unwrap();

  sleep(Duration::from_millis(60)).await;
  assert!(after_panic_ran.load(Ordering::SeqCst), "the worker slot is returned after a panic");
  assert_eq!(pool.running_units(), 0);
  pool.shutdown().await;
}
