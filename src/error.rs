use thiserror::Error;

/// Errors observed through compilation handles and result values.
///
/// Errors are replayed to every caller that shares a cache key or a call's
/// result list, so the type is cheap to clone and compares by value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JitError {
    /// The compiler failed to lower the request, or a specialization failed.
    #[error("compilation failed: {0}")]
    Compilation(String),

    /// No executable can be selected for the given operand shapes.
    #[error("no viable executable: {0}")]
    ExecutableSelection(String),

    /// A host argument could not be converted into a descriptor.
    #[error("failed to marshal argument #{index}: {message}")]
    Marshal { index: usize, message: String },

    /// A produced value could not be mapped to its declared result type.
    #[error("failed to convert result #{index}: {message}")]
    Conversion { index: usize, message: String },

    /// Argument or result arity/type mismatch at call time.
    #[error("invocation failed: {0}")]
    Invocation(String),

    /// Error reported by the running kernel itself.
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("invalid tensor: {0}")]
    InvalidTensor(String),
}

impl JitError {
    pub fn compilation(message: impl Into<String>) -> Self {
        Self::Compilation(message.into())
    }

    pub fn selection(message: impl Into<String>) -> Self {
        Self::ExecutableSelection(message.into())
    }

    pub fn invocation(message: impl Into<String>) -> Self {
        Self::Invocation(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    pub fn marshal(index: usize, message: impl Into<String>) -> Self {
        Self::Marshal {
            index,
            message: message.into(),
        }
    }

    pub fn conversion(index: usize, message: impl Into<String>) -> Self {
        Self::Conversion {
            index,
            message: message.into(),
        }
    }
}

/// Result type for runtime operations
pub type JitResult<T> = Result<T, JitError>;
