use std::fmt;
use std::sync::Arc;

use super::memref::MemrefDesc;
use super::request::CompilationRequest;
use super::results::ResultSink;
use super::specialization::Specializer;
use super::tensor::DType;
use crate::error::JitResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Static(i64),
    Dynamic,
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Static(size) => write!(f, "{size}"),
            Dim::Dynamic => f.write_str("?"),
        }
    }
}

/// Declared type of one executable operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperandType {
    pub dtype: DType,
    pub dims: Vec<Dim>,
}

impl OperandType {
    pub fn new(dtype: DType, dims: Vec<Dim>) -> Self {
        Self { dtype, dims }
    }

    /// Fully static operand type matching `sizes`.
    pub fn fixed(dtype: DType, sizes: &[i64]) -> Self {
        Self::new(dtype, sizes.iter().copied().map(Dim::Static).collect())
    }

    /// Operand type of the given rank with every dimension dynamic.
    pub fn dynamic(dtype: DType, rank: usize) -> Self {
        Self::new(dtype, vec![Dim::Dynamic; rank])
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn has_dynamic_dims(&self) -> bool {
        self.dims.iter().any(|dim| matches!(dim, Dim::Dynamic))
    }

    /// Checks a descriptor against this type, describing the first mismatch.
    pub fn check(&self, memref: &MemrefDesc) -> Result<(), String> {
        if memref.dtype() != self.dtype {
            return Err(format!(
                "expected {} element type, got {}",
                self.dtype,
                memref.dtype()
            ));
        }
        if memref.rank() != self.rank() {
            return Err(format!(
                "expected rank {}, got rank {}",
                self.rank(),
                memref.rank()
            ));
        }
        for (axis, (dim, &size)) in self.dims.iter().zip(memref.sizes()).enumerate() {
            if let Dim::Static(expected) = *dim {
                if expected != size {
                    return Err(format!(
                        "dimension {axis} must be {expected}, got {size}"
                    ));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("memref<")?;
        for dim in &self.dims {
            write!(f, "{dim}x")?;
        }
        write!(f, "{}>", self.dtype)
    }
}

/// Declared type of one executable result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultType {
    AsyncToken,
    AsyncMemref { dtype: DType, rank: usize },
    Memref { dtype: DType, rank: usize },
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultType::AsyncToken => f.write_str("!async.token"),
            ResultType::AsyncMemref { dtype, rank } => write!(f, "!async.value<memref<{rank}d x {dtype}>>"),
            ResultType::Memref { dtype, rank } => write!(f, "memref<{rank}d x {dtype}>"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    pub operands: Vec<OperandType>,
    pub results: Vec<ResultType>,
}

impl FunctionSignature {
    pub fn new(operands: Vec<OperandType>, results: Vec<ResultType>) -> Self {
        Self { operands, results }
    }

    pub fn num_results(&self) -> usize {
        self.results.len()
    }

    pub fn has_dynamic_shapes(&self) -> bool {
        self.operands.iter().any(OperandType::has_dynamic_dims)
    }

    /// Validates operand count and every operand type.
    pub fn check_operands(&self, memrefs: &[MemrefDesc]) -> Result<(), String> {
        if memrefs.len() != self.operands.len() {
            return Err(format!(
                "expected {} operands, got {}",
                self.operands.len(),
                memrefs.len()
            ));
        }
        for (index, (ty, memref)) in self.operands.iter().zip(memrefs).enumerate() {
            ty.check(memref)
                .map_err(|reason| format!("operand #{index} ({ty}): {reason}"))?;
        }
        Ok(())
    }
}

/// Callable compiled artifact.
///
/// `execute` reports failure of the call itself. Individual results may be
/// returned as async values that the executable resolves later from its own
/// work.
pub trait Executable: Send + Sync {
    fn name(&self) -> &str;

    fn signature(&self) -> &FunctionSignature;

    fn execute(&self, operands: &[MemrefDesc], results: &mut dyn ResultSink) -> JitResult<()>;
}

pub type ExecutableRef = Arc<dyn Executable>;

/// Information the compiler gets besides the request itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileContext {
    pub num_worker_threads: usize,
}

/// Output of a successful compilation.
#[derive(Clone)]
pub struct CompiledArtifact {
    pub executable: ExecutableRef,
    pub specializer: Option<Arc<dyn Specializer>>,
}

impl CompiledArtifact {
    pub fn new(executable: ExecutableRef) -> Self {
        Self {
            executable,
            specializer: None,
        }
    }

    pub fn with_specializer(mut self, specializer: Arc<dyn Specializer>) -> Self {
        self.specializer = Some(specializer);
        self
    }
}

impl fmt::Debug for CompiledArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("executable", &self.executable.name())
            .field("specializable", &self.specializer.is_some())
            .finish()
    }
}

/// Lowers a compilation request into an executable artifact.
pub trait Compiler: Send + Sync {
    fn compile(
        &self,
        request: &CompilationRequest,
        context: &CompileContext,
    ) -> JitResult<CompiledArtifact>;
}
