use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier assigned to each task at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

fn next_task_id() -> TaskId {
    TaskId::new(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
}

pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// A unit of background work handed to a [`super::WorkScheduler`].
pub struct Task {
    id: TaskId,
    name: Option<String>,
    func: TaskFn,
}

impl Task {
    pub fn new(name: Option<String>, func: TaskFn) -> Self {
        Self {
            id: next_task_id(),
            name,
            func,
        }
    }

    pub fn named<F>(name: impl Into<String>, func: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(Some(name.into()), Box::new(func))
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn run(self) {
        (self.func)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
