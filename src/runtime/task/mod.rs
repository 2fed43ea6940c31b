//! Task runtime scaffolding.
//!
//! Compilation and specialization run as [`Task`]s on a [`WorkScheduler`].
//! [`TaskScheduler`] is the default work-stealing pool; tests and embedders
//! may supply their own scheduler.

mod metrics;
mod scheduler;
mod task;

pub use metrics::{TaskMetricsSnapshot, TaskRuntimeMetrics};
pub use scheduler::{SchedulerConfig, TaskScheduler};
pub use task::{Task, TaskFn, TaskId};

use std::sync::Arc;

/// Runs units of work asynchronously on an unspecified thread.
pub trait WorkScheduler: Send + Sync {
    fn enqueue(&self, task: Task);

    /// Parallelism hint forwarded to the compiler.
    fn num_workers(&self) -> usize;
}

impl<S: WorkScheduler + ?Sized> WorkScheduler for Arc<S> {
    fn enqueue(&self, task: Task) {
        (**self).enqueue(task);
    }

    fn num_workers(&self) -> usize {
        (**self).num_workers()
    }
}
