// JIT compile cache and kernel dispatch
pub mod cache;
pub mod dispatch;
pub mod engine;
pub mod executable;
pub mod jit_executable;
pub mod memref;
pub mod request;
pub mod results;
pub mod specialization;
pub mod tensor;

pub use cache::{CacheEntry, CacheStats, CompilationCache};
pub use dispatch::{ExecutionDispatcher, KernelResults};
pub use engine::JitEngine;
pub use executable::{
    CompileContext, CompiledArtifact, Compiler, Dim, Executable, ExecutableRef,
    FunctionSignature, OperandType, ResultType,
};
pub use jit_executable::JitExecutable;
pub use memref::{ArgumentMarshaler, MemrefDesc, TensorMarshaler};
pub use request::{CacheKey, CompilationRequest, CompileOptions, KeyPolicy};
pub use results::{ConversionFn, RawValue, ResultSink, ReturnValueConverter};
pub use specialization::{ShapeSignature, SpecializationMode, Specializer};
pub use tensor::{DType, DenseHostTensor, Element, KernelValue};
