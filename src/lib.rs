//! A Tokio-based bounded fan-out executor: run a batch of fallible futures
//! concurrently and return on the first failure, an elapsed deadline, a
//! cancelled scope, or once every task has succeeded.
//!
//! Cancellation is cooperative. A task already running is never interrupted;
//! tasks that have not started yet are skipped once the batch has an outcome.

mod alloter;
mod batch;
mod ctrl;
mod error;
mod executor;
mod options;
mod outcome;
mod permit;
mod pool;
mod pooled;
mod scope;
mod task;
mod wrapper;

pub use alloter::Alloter;
pub use ctrl::CtrlAlloter;
pub use error::{AllotError, BoxError, SubmitError};
pub use executor::{join_all, Executor};
pub use options::{AllotOptions, Deadline};
pub use outcome::Outcome;
pub use permit::PermitSet;
pub use pool::{PoolUnit, TokioWorkerPool, WorkerPool};
pub use pooled::{PoolFactory, PooledAlloter};
pub use task::{Task, TaskResult};

pub use tokio_util::sync::CancellationToken;
