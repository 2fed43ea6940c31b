//! Deferred execution of compiled handles.
//!
//! [`ExecutionDispatcher::execute`] never blocks. Whatever is not ready yet
//! (arguments, the compiled handle, a specialization) is waited on through
//! continuations, and the caller receives indirect result values that are
//! forwarded once the real results exist.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{error, trace};

use super::executable::ExecutableRef;
use super::jit_executable::JitExecutable;
use super::memref::{ArgumentMarshaler, MemrefDesc, TensorMarshaler, marshal_operands};
use super::results::{ConversionFn, ReturnValueConverter, default_conversions, error_results};
use super::tensor::KernelValue;
use crate::error::JitError;
use crate::runtime::async_value::{AsyncValue, run_when_ready};

pub type KernelResults = Vec<AsyncValue<KernelValue>>;

#[derive(Clone)]
pub struct ExecutionDispatcher {
    marshaler: Arc<dyn ArgumentMarshaler>,
    conversions: Arc<[ConversionFn]>,
}

impl Default for ExecutionDispatcher {
    fn default() -> Self {
        Self {
            marshaler: Arc::new(TensorMarshaler),
            conversions: default_conversions().into(),
        }
    }
}

impl ExecutionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marshaler(mut self, marshaler: Arc<dyn ArgumentMarshaler>) -> Self {
        self.marshaler = marshaler;
        self
    }

    /// Replaces the result conversions; they are tried in order.
    pub fn with_conversions(mut self, conversions: Vec<ConversionFn>) -> Self {
        self.conversions = conversions.into();
        self
    }

    /// Runs `handle` on `operands`, returning `num_results` values immediately.
    ///
    /// Every returned value resolves exactly once, to a value or an error.
    /// Operands stay alive until all results are available.
    pub fn execute(
        &self,
        handle: &AsyncValue<JitExecutable>,
        operands: Vec<AsyncValue<KernelValue>>,
        num_results: usize,
    ) -> KernelResults {
        if operands.iter().all(AsyncValue::is_available) {
            return self.execute_with_operands(handle, operands, num_results);
        }

        trace!(num_results, "operands pending, deferring execution");
        let results = indirect_results(num_results);
        let dispatcher = self.clone();
        let handle = handle.clone();
        let placeholders = results.clone();
        let waiting = operands.clone();
        run_when_ready(&waiting, move || {
            let produced = dispatcher.execute_with_operands(&handle, operands, placeholders.len());
            forward_results(&placeholders, produced);
        });
        results
    }

    fn execute_with_operands(
        &self,
        handle: &AsyncValue<JitExecutable>,
        operands: Vec<AsyncValue<KernelValue>>,
        num_results: usize,
    ) -> KernelResults {
        let memrefs = match marshal_operands(self.marshaler.as_ref(), &operands) {
            Ok(memrefs) => memrefs,
            Err(err) => return error_results(num_results, &err),
        };

        match handle.get() {
            Some(Ok(executable)) => self.dispatch(executable, memrefs, operands, num_results),
            Some(Err(err)) => error_results(num_results, err),
            None => {
                trace!(num_results, "compiled handle pending, deferring execution");
                let results = indirect_results(num_results);
                let dispatcher = self.clone();
                let pending = handle.clone();
                let placeholders = results.clone();
                handle.and_then(move || {
                    let produced = match pending.get() {
                        Some(Ok(executable)) => {
                            dispatcher.dispatch(executable, memrefs, operands, placeholders.len())
                        }
                        Some(Err(err)) => error_results(placeholders.len(), err),
                        None => error_results(placeholders.len(), &unresolved()),
                    };
                    forward_results(&placeholders, produced);
                });
                results
            }
        }
    }

    fn dispatch(
        &self,
        executable: &JitExecutable,
        memrefs: Vec<MemrefDesc>,
        operands: Vec<AsyncValue<KernelValue>>,
        num_results: usize,
    ) -> KernelResults {
        let selected = match executable.get_executable(&memrefs) {
            Ok(selected) => selected,
            Err(err) => return error_results(num_results, &err),
        };

        match selected.get() {
            Some(Ok(exe)) => invoke(exe, &memrefs, operands, &self.conversions, num_results),
            Some(Err(err)) => error_results(num_results, err),
            None => {
                trace!(executable = executable.name(), "waiting for specialization");
                let invocation = Invocation {
                    executable: selected.clone(),
                    memrefs,
                    operands,
                    results: indirect_results(num_results),
                    conversions: Arc::clone(&self.conversions),
                };
                let results = invocation.results.clone();
                selected.and_then(move || invocation.run());
                results
            }
        }
    }
}

impl fmt::Debug for ExecutionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionDispatcher")
            .field("conversions", &self.conversions.len())
            .finish_non_exhaustive()
    }
}

/// Invocation waiting for its executable.
///
/// Owns the descriptors, the caller's operands and the placeholders already
/// handed out; all of it is released once [`Invocation::run`] returns.
struct Invocation {
    executable: AsyncValue<ExecutableRef>,
    memrefs: Vec<MemrefDesc>,
    operands: Vec<AsyncValue<KernelValue>>,
    results: KernelResults,
    conversions: Arc<[ConversionFn]>,
}

impl Invocation {
    fn run(self) {
        let num_results = self.results.len();
        let produced = match self.executable.get() {
            Some(Ok(exe)) => invoke(
                exe,
                &self.memrefs,
                self.operands,
                &self.conversions,
                num_results,
            ),
            Some(Err(err)) => error_results(num_results, err),
            None => error_results(num_results, &unresolved()),
        };
        forward_results(&self.results, produced);
    }
}

/// Calls `executable` and converts what it returns.
///
/// Arity or operand mismatches fail every result with an invocation error;
/// a kernel error or panic fails every result with that error.
fn invoke(
    executable: &ExecutableRef,
    memrefs: &[MemrefDesc],
    operands: Vec<AsyncValue<KernelValue>>,
    conversions: &[ConversionFn],
    num_results: usize,
) -> KernelResults {
    let signature = executable.signature();
    if signature.num_results() != num_results {
        let err = JitError::invocation(format!(
            "{} returns {} results, caller expects {num_results}",
            executable.name(),
            signature.num_results()
        ));
        return error_results(num_results, &err);
    }
    if let Err(reason) = signature.check_operands(memrefs) {
        let err = JitError::invocation(format!("{}: {reason}", executable.name()));
        return error_results(num_results, &err);
    }

    let mut converter = ReturnValueConverter::new(&signature.results, conversions);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        executable.execute(memrefs, &mut converter)
    }));
    let results = match outcome {
        Ok(Ok(())) => converter.finish(),
        Ok(Err(err)) => converter.fail(&err),
        Err(_) => {
            error!(executable = executable.name(), "kernel panicked");
            converter.fail(&JitError::execution("kernel panicked"))
        }
    };

    let executable = Arc::clone(executable);
    run_when_ready(&results, move || drop((operands, executable)));
    results
}

fn indirect_results(count: usize) -> KernelResults {
    (0..count).map(|_| AsyncValue::indirect()).collect()
}

fn forward_results(placeholders: &[AsyncValue<KernelValue>], produced: KernelResults) {
    for (index, (placeholder, result)) in placeholders.iter().zip(produced).enumerate() {
        if let Err(err) = placeholder.forward_to(result) {
            error!(index, error = %err, "failed to forward kernel result");
        }
    }
}

fn unresolved() -> JitError {
    JitError::execution("continuation ran before its value was resolved")
}
