// Compilation cache
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, warn};

use super::jit_executable::JitExecutable;
use super::request::CacheKey;
use crate::error::{JitError, JitResult};
use crate::runtime::async_value::AsyncValue;
use crate::runtime::task::{Task, WorkScheduler};

/// Result of [`CompilationCache::allocate`].
///
/// `allocated` is true for exactly one caller per key: the one that inserted
/// the entry and therefore owns the compilation.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: AsyncValue<JitExecutable>,
    pub allocated: bool,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    compilations: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub compilations: u64,
    pub failures: u64,
}

/// Concurrent map from cache key to a (possibly pending) compiled handle.
///
/// Entries are never evicted. A failed compilation stays cached and is
/// replayed to every later caller of the same key.
#[derive(Debug, Default)]
pub struct CompilationCache {
    entries: RwLock<HashMap<CacheKey, AsyncValue<JitExecutable>, ahash::RandomState>>,
    counters: Arc<CacheCounters>,
}

impl CompilationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hit path only; never creates an entry.
    pub fn find(&self, key: &CacheKey) -> Option<AsyncValue<JitExecutable>> {
        let found = self.entries.read().get(key).cloned();
        if found.is_some() {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Atomic get-or-create of the entry for `key`.
    pub fn allocate(&self, key: CacheKey) -> CacheEntry {
        let mut entries = self.entries.write();
        match entries.entry(key) {
            Entry::Occupied(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                CacheEntry {
                    key: entry.key().clone(),
                    value: entry.get().clone(),
                    allocated: false,
                }
            }
            Entry::Vacant(entry) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                let key = entry.key().clone();
                let value = entry.insert(AsyncValue::pending()).clone();
                CacheEntry {
                    key,
                    value,
                    allocated: true,
                }
            }
        }
    }

    /// Returns the handle for `key`, scheduling `compile` on `scheduler` when
    /// this call created the entry.
    ///
    /// `compile` runs at most once per key. A panic inside it resolves the
    /// entry with a compilation error.
    pub fn get_or_compile<F>(
        &self,
        key: CacheKey,
        scheduler: &dyn WorkScheduler,
        compile: F,
    ) -> AsyncValue<JitExecutable>
    where
        F: FnOnce() -> JitResult<JitExecutable> + Send + 'static,
    {
        if let Some(value) = self.find(&key) {
            debug!(key = %key, "compilation cache hit");
            return value;
        }

        let entry = self.allocate(key);
        if !entry.allocated {
            debug!(key = %entry.key, "compilation cache hit");
            return entry.value;
        }

        debug!(key = %entry.key, "compilation cache miss, scheduling compilation");
        self.counters.compilations.fetch_add(1, Ordering::Relaxed);
        let counters = Arc::clone(&self.counters);
        let target = entry.value.clone();
        let key = entry.key;
        scheduler.enqueue(Task::named(format!("compile {key}"), move || {
            let start = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(compile))
                .unwrap_or_else(|_| Err(JitError::compilation("compiler panicked")));
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
            match &result {
                Ok(executable) => {
                    debug!(key = %key, executable = executable.name(), elapsed_ms, "compiled");
                }
                Err(err) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, elapsed_ms, error = %err, "compilation failed");
                }
            }
            target.resolve(result);
        }));

        entry.value
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            compilations: self.counters.compilations.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::jit::executable::{
        CompiledArtifact, Executable, FunctionSignature, ResultType,
    };
    use crate::runtime::jit::memref::MemrefDesc;
    use crate::runtime::jit::results::ResultSink;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    struct Noop(FunctionSignature);

    impl Executable for Noop {
        fn name(&self) -> &str {
            "noop"
        }

        fn signature(&self) -> &FunctionSignature {
            &self.0
        }

        fn execute(&self, _: &[MemrefDesc], _: &mut dyn ResultSink) -> JitResult<()> {
            Ok(())
        }
    }

    /// Holds tasks until `run_all` is called.
    #[derive(Default)]
    struct Deferred(Mutex<Vec<Task>>);

    impl Deferred {
        fn run_all(&self) {
            let tasks = std::mem::take(&mut *self.0.lock());
            tasks.into_iter().for_each(Task::run);
        }
    }

    impl WorkScheduler for Deferred {
        fn enqueue(&self, task: Task) {
            self.0.lock().push(task);
        }

        fn num_workers(&self) -> usize {
            1
        }
    }

    fn handle(scheduler: Arc<Deferred>) -> JitResult<JitExecutable> {
        let exe = Arc::new(Noop(FunctionSignature::new(
            Vec::new(),
            vec![ResultType::AsyncToken],
        )));
        Ok(JitExecutable::new(CompiledArtifact::new(exe), scheduler))
    }

    #[test]
    fn allocate_reports_the_winner_once() {
        let cache = CompilationCache::new();
        let key = CacheKey::new("k");
        let first = cache.allocate(key.clone());
        let second = cache.allocate(key.clone());
        assert!(first.allocated);
        assert!(!second.allocated);
        assert!(first.value.ptr_eq(&second.value));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn compiles_once_and_shares_the_pending_handle() {
        let cache = CompilationCache::new();
        let scheduler = Arc::new(Deferred::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let key = CacheKey::new("kernel");

        let mut handles = Vec::new();
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let inner = Arc::clone(&scheduler);
            handles.push(cache.get_or_compile(key.clone(), scheduler.as_ref(), move || {
                calls.fetch_add(1, Ordering::SeqCst);
                handle(inner)
            }));
        }
        assert!(handles.iter().all(|h| !h.is_available()));

        scheduler.run_all();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handles.iter().all(|h| h.value().is_some()));

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.compilations, 1);
    }

    #[test]
    fn failures_are_cached() {
        let cache = CompilationCache::new();
        let scheduler = Deferred::default();
        let key = CacheKey::new("broken");
        let failed = cache.get_or_compile(key.clone(), &scheduler, || {
            Err(JitError::compilation("bad module"))
        });
        scheduler.run_all();

        let again = cache.get_or_compile(key, &scheduler, || panic!("must not recompile"));
        assert!(again.ptr_eq(&failed));
        assert_eq!(again.error_ref(), Some(&JitError::compilation("bad module")));
        assert_eq!(cache.stats().failures, 1);
    }

    #[test]
    fn compiler_panic_becomes_an_error() {
        let cache = CompilationCache::new();
        let scheduler = Deferred::default();
        let value = cache.get_or_compile(CacheKey::new("p"), &scheduler, || panic!("lowering"));
        scheduler.run_all();
        assert!(matches!(value.error_ref(), Some(JitError::Compilation(_))));
    }
}
