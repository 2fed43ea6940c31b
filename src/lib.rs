//! Single-flight JIT compilation cache and non-blocking kernel dispatch.
//!
//! [`JitEngine::compile`] deduplicates compilation requests through a
//! [`CompilationCache`] and hands back a handle before compilation finishes.
//! [`JitEngine::execute`] runs a handle on arguments that may still be pending
//! and returns one [`AsyncValue`] per result immediately.

pub mod config;
pub mod error;
pub mod runtime;

pub use config::JitConfig;
pub use error::{JitError, JitResult};
pub use kernjit_utils::{init_logging, init_logging_with};
pub use runtime::async_value::{AsyncValue, ForwardError, run_when_ready};
pub use runtime::jit::{CompilationCache, ExecutionDispatcher, JitEngine, JitExecutable};
pub use runtime::task::{Task, TaskScheduler, WorkScheduler};
