use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::cache::CompilationCache;
use super::dispatch::{ExecutionDispatcher, KernelResults};
use super::executable::{CompileContext, Compiler};
use super::jit_executable::JitExecutable;
use super::memref::ArgumentMarshaler;
use super::request::CompilationRequest;
use super::tensor::KernelValue;
use crate::config::JitConfig;
use crate::runtime::async_value::AsyncValue;
use crate::runtime::task::{SchedulerConfig, TaskScheduler, WorkScheduler};

/// Kernel front end: compiles requests through the cache and executes the
/// resulting handles.
pub struct JitEngine {
    config: JitConfig,
    compiler: Arc<dyn Compiler>,
    scheduler: Arc<dyn WorkScheduler>,
    cache: CompilationCache,
    dispatcher: ExecutionDispatcher,
}

impl JitEngine {
    /// Creates an engine with its own compilation worker pool.
    pub fn new(config: JitConfig, compiler: Arc<dyn Compiler>) -> Result<Self> {
        let scheduler = TaskScheduler::new(SchedulerConfig::with_workers(config.worker_threads))
            .context("failed to start compilation workers")?;
        Ok(Self::with_scheduler(config, compiler, Arc::new(scheduler)))
    }

    pub fn with_scheduler(
        config: JitConfig,
        compiler: Arc<dyn Compiler>,
        scheduler: Arc<dyn WorkScheduler>,
    ) -> Self {
        Self {
            config,
            compiler,
            scheduler,
            cache: CompilationCache::new(),
            dispatcher: ExecutionDispatcher::new(),
        }
    }

    pub fn with_marshaler(mut self, marshaler: Arc<dyn ArgumentMarshaler>) -> Self {
        self.dispatcher = self.dispatcher.with_marshaler(marshaler);
        self
    }

    /// Returns the compiled handle for `request`, compiling it in the
    /// background the first time its key is seen.
    ///
    /// Invalid requests fail immediately and are not cached.
    pub fn compile(&self, request: CompilationRequest) -> AsyncValue<JitExecutable> {
        if let Err(err) = request.validate() {
            warn!(entry_point = request.entry_point(), error = %err, "rejecting compilation request");
            return AsyncValue::error(err);
        }

        let key = request.cache_key(self.config.key_policy);
        debug!(key = %key, entry_point = request.entry_point(), "compile");

        let compiler = Arc::clone(&self.compiler);
        let scheduler = Arc::clone(&self.scheduler);
        let mode = self.config.specialization;
        let max_specializations = self.config.max_specializations;
        self.cache.get_or_compile(key, self.scheduler.as_ref(), move || {
            let context = CompileContext {
                num_worker_threads: scheduler.num_workers(),
            };
            let artifact = compiler.compile(&request, &context)?;
            Ok(JitExecutable::new(artifact, scheduler)
                .with_mode(mode)
                .with_max_specializations(max_specializations))
        })
    }

    /// Executes `handle` on `args`, returning `num_results` result values
    /// without blocking.
    pub fn execute(
        &self,
        handle: &AsyncValue<JitExecutable>,
        args: Vec<AsyncValue<KernelValue>>,
        num_results: usize,
    ) -> KernelResults {
        self.dispatcher.execute(handle, args, num_results)
    }

    pub fn cache(&self) -> &CompilationCache {
        &self.cache
    }

    pub fn config(&self) -> &JitConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<dyn WorkScheduler> {
        &self.scheduler
    }
}

impl fmt::Debug for JitEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitEngine")
            .field("config", &self.config)
            .field("cache", &self.cache.stats())
            .finish_non_exhaustive()
    }
}
