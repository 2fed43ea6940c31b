use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::executable::{CompiledArtifact, ExecutableRef, FunctionSignature};
use super::memref::MemrefDesc;
use super::specialization::{ShapeSignature, SpecializationMode, Specializer};
use crate::error::{JitError, JitResult};
use crate::runtime::async_value::AsyncValue;
use crate::runtime::task::{Task, WorkScheduler};

pub const DEFAULT_MAX_SPECIALIZATIONS: usize = 10;

/// Compiled artifact handle.
///
/// Owns the generic executable and, when the compiler supplied a
/// [`Specializer`], lazily creates one executable per distinct operand shape
/// signature. Specializations live as long as the handle.
pub struct JitExecutable {
    generic: ExecutableRef,
    generic_value: AsyncValue<ExecutableRef>,
    specializer: Option<Arc<dyn Specializer>>,
    mode: SpecializationMode,
    max_specializations: usize,
    specializations: Mutex<HashMap<ShapeSignature, AsyncValue<ExecutableRef>, ahash::RandomState>>,
    scheduler: Arc<dyn WorkScheduler>,
}

impl JitExecutable {
    pub fn new(artifact: CompiledArtifact, scheduler: Arc<dyn WorkScheduler>) -> Self {
        let generic_value = AsyncValue::ready(Arc::clone(&artifact.executable));
        Self {
            generic: artifact.executable,
            generic_value,
            specializer: artifact.specializer,
            mode: SpecializationMode::default(),
            max_specializations: DEFAULT_MAX_SPECIALIZATIONS,
            specializations: Mutex::new(HashMap::default()),
            scheduler,
        }
    }

    pub fn with_mode(mut self, mode: SpecializationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_specializations(mut self, max: usize) -> Self {
        self.max_specializations = max;
        self
    }

    pub fn name(&self) -> &str {
        self.generic.name()
    }

    pub fn signature(&self) -> &FunctionSignature {
        self.generic.signature()
    }

    pub fn mode(&self) -> SpecializationMode {
        self.mode
    }

    pub fn default_executable(&self) -> AsyncValue<ExecutableRef> {
        self.generic_value.clone()
    }

    pub fn num_specializations(&self) -> usize {
        self.specializations.lock().len()
    }

    /// Selects the executable for `operands`, starting a specialization when
    /// this shape signature has not been seen yet.
    ///
    /// The returned value may still be pending. A failed specialization stays
    /// cached for its signature.
    pub fn get_executable(&self, operands: &[MemrefDesc]) -> JitResult<AsyncValue<ExecutableRef>> {
        self.signature()
            .check_operands(operands)
            .map_err(|reason| JitError::selection(format!("{}: {reason}", self.name())))?;

        let Some(specializer) = &self.specializer else {
            return Ok(self.default_executable());
        };
        match self.mode {
            SpecializationMode::Disabled => return Ok(self.default_executable()),
            SpecializationMode::Enabled if !self.signature().has_dynamic_shapes() => {
                return Ok(self.default_executable());
            }
            SpecializationMode::Enabled | SpecializationMode::Always => {}
        }

        let signature = ShapeSignature::from_operands(operands);
        let pending = {
            let mut specializations = self.specializations.lock();
            if let Some(existing) = specializations.get(&signature) {
                return Ok(existing.clone());
            }
            if specializations.len() >= self.max_specializations {
                warn!(
                    executable = self.name(),
                    limit = self.max_specializations,
                    signature = %signature,
                    "specialization limit reached, using generic executable"
                );
                return Ok(self.default_executable());
            }
            let pending = AsyncValue::pending();
            specializations.insert(signature.clone(), pending.clone());
            pending
        };

        debug!(executable = self.name(), signature = %signature, "scheduling specialization");
        let specializer = Arc::clone(specializer);
        let generic = Arc::clone(&self.generic);
        let target = pending.clone();
        self.scheduler.enqueue(Task::named(
            format!("specialize {}", self.name()),
            move || {
                let start = Instant::now();
                let result =
                    panic::catch_unwind(AssertUnwindSafe(|| specializer.specialize(&generic, &signature)))
                        .unwrap_or_else(|_| Err(JitError::compilation("specializer panicked")));
                debug!(
                    executable = generic.name(),
                    signature = %signature,
                    ok = result.is_ok(),
                    elapsed_us = start.elapsed().as_micros() as u64,
                    "specialization finished"
                );
                target.resolve(result);
            },
        ));

        Ok(pending)
    }
}

impl fmt::Debug for JitExecutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitExecutable")
            .field("name", &self.name())
            .field("mode", &self.mode)
            .field("specializable", &self.specializer.is_some())
            .field("specializations", &self.num_specializations())
            .finish()
    }
}
