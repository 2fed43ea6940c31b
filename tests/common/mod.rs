#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use kernjit::runtime::jit::{
    CompilationRequest, CompileContext, CompiledArtifact, Compiler, DType, DenseHostTensor,
    Executable, ExecutableRef, FunctionSignature, KernelValue, MemrefDesc, OperandType, RawValue,
    ResultSink, ResultType, ShapeSignature, Specializer,
};
use kernjit::{AsyncValue, JitError, JitResult, Task, WorkScheduler};
use parking_lot::Mutex;

/// Queues tasks until the test runs them.
#[derive(Default)]
pub struct ManualScheduler {
    tasks: Mutex<Vec<Task>>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Runs queued tasks, including ones enqueued while running, until the
    /// queue is empty. Returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch = std::mem::take(&mut *self.tasks.lock());
            if batch.is_empty() {
                return ran;
            }
            ran += batch.len();
            batch.into_iter().for_each(Task::run);
        }
    }
}

impl WorkScheduler for ManualScheduler {
    fn enqueue(&self, task: Task) {
        self.tasks.lock().push(task);
    }

    fn num_workers(&self) -> usize {
        1
    }
}

/// Compiler double returning a fixed artifact and counting invocations.
pub struct CountingCompiler {
    calls: AtomicUsize,
    delay: Duration,
    failure: Option<String>,
    artifact: CompiledArtifact,
}

impl CountingCompiler {
    pub fn new(artifact: CompiledArtifact) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            failure: None,
            artifact,
        }
    }

    pub fn scale(factor: f32) -> Self {
        Self::new(CompiledArtifact::new(Arc::new(ScaleKernel::dynamic(factor))))
    }

    pub fn failing(message: &str) -> Self {
        let mut compiler = Self::scale(1.0);
        compiler.failure = Some(message.to_string());
        compiler
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Compiler for CountingCompiler {
    fn compile(
        &self,
        _request: &CompilationRequest,
        _context: &CompileContext,
    ) -> JitResult<CompiledArtifact> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        match &self.failure {
            Some(message) => Err(JitError::compilation(message.clone())),
            None => Ok(self.artifact.clone()),
        }
    }
}

/// Multiplies a rank-1 f32 operand and returns the result synchronously.
pub struct ScaleKernel {
    name: String,
    signature: FunctionSignature,
    factor: f32,
}

impl ScaleKernel {
    pub fn dynamic(factor: f32) -> Self {
        Self::with_operand("scale", OperandType::dynamic(DType::F32, 1), factor)
    }

    pub fn with_operand(name: &str, operand: OperandType, factor: f32) -> Self {
        let rank = operand.rank();
        Self {
            name: name.to_string(),
            signature: FunctionSignature::new(
                vec![operand],
                vec![ResultType::Memref {
                    dtype: DType::F32,
                    rank,
                }],
            ),
            factor,
        }
    }
}

impl Executable for ScaleKernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    fn execute(&self, operands: &[MemrefDesc], results: &mut dyn ResultSink) -> JitResult<()> {
        let scaled = scale_memref(&operands[0], self.factor)?;
        results.return_value(0, RawValue::Memref(scaled));
        Ok(())
    }
}

/// Like [`ScaleKernel`] but produces its result later, on `scheduler`.
pub struct DeferredScaleKernel {
    signature: FunctionSignature,
    factor: f32,
    scheduler: Arc<ManualScheduler>,
}

impl DeferredScaleKernel {
    pub fn new(factor: f32, scheduler: Arc<ManualScheduler>) -> Self {
        Self {
            signature: FunctionSignature::new(
                vec![OperandType::dynamic(DType::F32, 1)],
                vec![ResultType::AsyncMemref {
                    dtype: DType::F32,
                    rank: 1,
                }],
            ),
            factor,
            scheduler,
        }
    }
}

impl Executable for DeferredScaleKernel {
    fn name(&self) -> &str {
        "deferred_scale"
    }

    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    fn execute(&self, operands: &[MemrefDesc], results: &mut dyn ResultSink) -> JitResult<()> {
        let output = AsyncValue::pending();
        let target = output.clone();
        let input = operands[0].clone();
        let factor = self.factor;
        self.scheduler.enqueue(Task::named("deferred scale", move || {
            target.resolve(scale_memref(&input, factor));
        }));
        results.return_value(0, RawValue::AsyncMemref(output));
        Ok(())
    }
}

/// Returns one pending token per call, completed by the test.
///
/// Never retains its operands.
pub struct TokenKernel {
    signature: FunctionSignature,
    tokens: Mutex<Vec<AsyncValue<()>>>,
}

impl TokenKernel {
    pub fn new() -> Self {
        Self {
            signature: FunctionSignature::new(
                vec![OperandType::dynamic(DType::F32, 1)],
                vec![ResultType::AsyncToken],
            ),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn complete_all(&self) {
        let tokens = std::mem::take(&mut *self.tokens.lock());
        for token in tokens {
            token.set_value(());
        }
    }
}

impl Executable for TokenKernel {
    fn name(&self) -> &str {
        "token"
    }

    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    fn execute(&self, _operands: &[MemrefDesc], results: &mut dyn ResultSink) -> JitResult<()> {
        let token = AsyncValue::pending();
        self.tokens.lock().push(token.clone());
        results.return_value(0, RawValue::AsyncToken(token));
        Ok(())
    }
}

/// Returns the wrong raw kind for its first result.
pub struct MixedKernel {
    signature: FunctionSignature,
}

impl MixedKernel {
    pub fn new() -> Self {
        Self {
            signature: FunctionSignature::new(
                vec![OperandType::dynamic(DType::F32, 1)],
                vec![
                    ResultType::Memref {
                        dtype: DType::F32,
                        rank: 1,
                    },
                    ResultType::AsyncToken,
                ],
            ),
        }
    }
}

impl Executable for MixedKernel {
    fn name(&self) -> &str {
        "mixed"
    }

    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    fn execute(&self, operands: &[MemrefDesc], results: &mut dyn ResultSink) -> JitResult<()> {
        // Wrong raw kind for result 0; the duplicate for result 1 is ignored.
        results.return_value(0, RawValue::AsyncToken(AsyncValue::ready(())));
        results.return_value(1, RawValue::AsyncToken(AsyncValue::ready(())));
        results.return_value(1, RawValue::Memref(operands[0].clone()));
        Ok(())
    }
}

/// Always reports a runtime failure.
pub struct FailingKernel {
    signature: FunctionSignature,
}

impl FailingKernel {
    pub fn new(num_results: usize) -> Self {
        Self {
            signature: FunctionSignature::new(
                vec![OperandType::dynamic(DType::F32, 1)],
                vec![ResultType::AsyncToken; num_results],
            ),
        }
    }
}

impl Executable for FailingKernel {
    fn name(&self) -> &str {
        "failing"
    }

    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    fn execute(&self, _operands: &[MemrefDesc], _results: &mut dyn ResultSink) -> JitResult<()> {
        Err(JitError::execution("kernel trapped"))
    }
}

/// Panics instead of returning.
pub struct PanickingKernel {
    signature: FunctionSignature,
}

impl PanickingKernel {
    pub fn new(num_results: usize) -> Self {
        Self {
            signature: FunctionSignature::new(
                vec![OperandType::dynamic(DType::F32, 1)],
                vec![ResultType::AsyncToken; num_results],
            ),
        }
    }
}

impl Executable for PanickingKernel {
    fn name(&self) -> &str {
        "panicking"
    }

    fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    fn execute(&self, _operands: &[MemrefDesc], _results: &mut dyn ResultSink) -> JitResult<()> {
        panic!("kernel bug")
    }
}

/// Specializer double producing a [`ScaleKernel`] with static operand shapes.
pub struct CountingSpecializer {
    calls: AtomicUsize,
    factor: f32,
    failure: Option<String>,
}

impl CountingSpecializer {
    pub fn new(factor: f32) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            factor,
            failure: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::new(1.0)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Specializer for CountingSpecializer {
    fn specialize(
        &self,
        _generic: &ExecutableRef,
        signature: &ShapeSignature,
    ) -> JitResult<ExecutableRef> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(JitError::compilation(message.clone()));
        }
        let operand = signature.operand_types().remove(0);
        Ok(Arc::new(ScaleKernel::with_operand(
            &format!("scale_{signature}"),
            operand,
            self.factor,
        )))
    }
}

pub fn scale_memref(input: &MemrefDesc, factor: f32) -> JitResult<MemrefDesc> {
    let tensor = input.to_dense_tensor()?;
    let values = tensor
        .to_vec::<f32>()
        .ok_or_else(|| JitError::execution("expected f32 operand"))?;
    let scaled: Vec<f32> = values.into_iter().map(|v| v * factor).collect();
    let output = DenseHostTensor::from_slice(tensor.shape().to_vec(), &scaled)?;
    Ok(MemrefDesc::from_tensor(&output))
}

pub fn f32_tensor(values: &[f32]) -> DenseHostTensor {
    DenseHostTensor::from_slice(vec![values.len() as i64], values).expect("valid tensor")
}

pub fn f32_arg(values: &[f32]) -> AsyncValue<KernelValue> {
    AsyncValue::ready(KernelValue::from(f32_tensor(values)))
}

pub fn f32_values(result: &AsyncValue<KernelValue>) -> Vec<f32> {
    result
        .value()
        .and_then(KernelValue::as_tensor)
        .and_then(|tensor| tensor.to_vec::<f32>())
        .expect("f32 tensor result")
}

pub fn request(source: &str) -> CompilationRequest {
    CompilationRequest::new(source, "main")
}
