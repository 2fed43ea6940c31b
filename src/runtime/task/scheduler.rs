use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use crossbeam_utils::Backoff;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{error, trace};

use super::WorkScheduler;
use super::metrics::{TaskMetricsSnapshot, TaskRuntimeMetrics};
use super::task::Task;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_workers: usize,
    pub thread_name_prefix: String,
}

impl SchedulerConfig {
    pub fn with_workers(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            ..Self::default()
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            max_workers: workers,
            thread_name_prefix: "kernjit-worker".to_string(),
        }
    }
}

#[derive(Debug)]
struct SchedulerCore {
    injector: Injector<Task>,
    metrics: Arc<TaskRuntimeMetrics>,
    shutdown: AtomicBool,
    workers: usize,
}

impl SchedulerCore {
    fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Shuts the pool down once the last user-facing handle is gone.
#[derive(Debug)]
struct ShutdownOnDrop(Arc<SchedulerCore>);

impl Drop for ShutdownOnDrop {
    fn drop(&mut self) {
        self.0.request_shutdown();
    }
}

/// Work-stealing thread pool used for compilation and specialization.
///
/// Clones share the same pool. Workers drain whatever is queued and exit once
/// the last clone is dropped or [`TaskScheduler::shutdown`] is called.
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    core: Arc<SchedulerCore>,
    _owner: Arc<ShutdownOnDrop>,
}

impl TaskScheduler {
    pub fn new(config: SchedulerConfig) -> anyhow::Result<Self> {
        let worker_count = config.max_workers.max(1);
        let mut workers = Vec::with_capacity(worker_count);
        let mut stealer_store = Vec::with_capacity(worker_count);

        for _ in 0..worker_count {
            let worker = Worker::new_fifo();
            stealer_store.push(worker.stealer());
            workers.push(worker);
        }

        let stealers = Arc::new(stealer_store);

        let core = Arc::new(SchedulerCore {
            injector: Injector::new(),
            metrics: TaskRuntimeMetrics::new(),
            shutdown: AtomicBool::new(false),
            workers: worker_count,
        });

        for (index, worker) in workers.into_iter().enumerate() {
            let worker_core = Arc::clone(&core);
            let stealers = Arc::clone(&stealers);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", config.thread_name_prefix, index))
                .spawn(move || worker_loop(worker_core, stealers, worker, index));
            if let Err(err) = spawned {
                core.request_shutdown();
                return Err(anyhow::anyhow!("failed to spawn task worker {index}: {err}"));
            }
        }

        Ok(Self {
            _owner: Arc::new(ShutdownOnDrop(Arc::clone(&core))),
            core,
        })
    }

    pub fn metrics(&self) -> TaskMetricsSnapshot {
        self.core.metrics.snapshot()
    }

    pub fn spawn_fn<F>(&self, name: Option<String>, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Task::new(name, Box::new(func)));
    }

    pub fn shutdown(&self) {
        self.core.request_shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.core.shutdown.load(Ordering::SeqCst)
    }
}

impl WorkScheduler for TaskScheduler {
    fn enqueue(&self, task: Task) {
        trace!(task = task.id().raw(), name = task.name().unwrap_or("anonymous"), "enqueue");
        self.core.metrics.record_spawn();
        self.core.injector.push(task);
    }

    fn num_workers(&self) -> usize {
        self.core.workers
    }
}

fn run_task(core: &SchedulerCore, task: Task) {
    let id = task.id().raw();
    let name = task.name().map(str::to_owned);
    if panic::catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
        core.metrics.record_panic();
        error!(task = id, name = name.as_deref().unwrap_or("anonymous"), "task panicked");
    }
    core.metrics.record_completion();
}

fn worker_loop(
    core: Arc<SchedulerCore>,
    stealers: Arc<Vec<Stealer<Task>>>,
    local: Worker<Task>,
    index: usize,
) {
    let stealers: Vec<_> = stealers
        .iter()
        .enumerate()
        .filter_map(|(i, stealer)| {
            if i != index {
                Some(stealer.clone())
            } else {
                None
            }
        })
        .collect();
    let backoff = Backoff::new();

    loop {
        if let Some(task) = local.pop() {
            backoff.reset();
            run_task(&core, task);
            continue;
        }

        match core.injector.steal_batch_and_pop(&local) {
            Steal::Success(task) => {
                backoff.reset();
                run_task(&core, task);
                continue;
            }
            Steal::Retry => {
                backoff.spin();
                continue;
            }
            Steal::Empty => {}
        }

        let mut stolen = None;
        let mut retry = false;
        for stealer in &stealers {
            match stealer.steal() {
                Steal::Success(task) => {
                    stolen = Some(task);
                    break;
                }
                Steal::Retry => retry = true,
                Steal::Empty => continue,
            }
        }

        if let Some(task) = stolen {
            backoff.reset();
            run_task(&core, task);
            continue;
        }

        // Queues are drained before honouring shutdown.
        if !retry && core.shutdown.load(Ordering::SeqCst) {
            break;
        }

        if backoff.is_completed() {
            thread::sleep(Duration::from_micros(100));
        } else {
            backoff.snooze();
        }
    }
}
