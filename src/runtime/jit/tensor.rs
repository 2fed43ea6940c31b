//! Host values flowing through argument and result async values.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{JitError, JitResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    I1,
    I8,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::I1 | DType::I8 => 1,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::I1 => "i1",
            DType::I8 => "i8",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Primitive element types with a fixed [`DType`].
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DType;

    fn write_bytes(self, out: &mut Vec<u8>);

    fn read_bytes(bytes: &[u8]) -> Self;
}

macro_rules! numeric_element {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            fn write_bytes(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            fn read_bytes(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(bytes);
                <$ty>::from_ne_bytes(raw)
            }
        }
    };
}

numeric_element!(i8, DType::I8);
numeric_element!(i32, DType::I32);
numeric_element!(i64, DType::I64);
numeric_element!(f32, DType::F32);
numeric_element!(f64, DType::F64);

impl Element for bool {
    const DTYPE: DType = DType::I1;

    fn write_bytes(self, out: &mut Vec<u8>) {
        out.push(u8::from(self));
    }

    fn read_bytes(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

/// Number of elements described by `shape`, or `None` for negative or
/// overflowing extents.
pub fn num_elements(shape: &[i64]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| {
        let dim = usize::try_from(dim).ok()?;
        acc.checked_mul(dim)
    })
}

/// Dense row-major tensor backed by a shared host buffer.
#[derive(Clone, PartialEq)]
pub struct DenseHostTensor {
    dtype: DType,
    shape: Vec<i64>,
    buffer: Arc<[u8]>,
}

impl DenseHostTensor {
    pub fn new(dtype: DType, shape: Vec<i64>, buffer: Arc<[u8]>) -> JitResult<Self> {
        let elements = num_elements(&shape)
            .ok_or_else(|| JitError::InvalidTensor(format!("bad shape {shape:?}")))?;
        let expected = elements * dtype.size_in_bytes();
        if buffer.len() != expected {
            return Err(JitError::InvalidTensor(format!(
                "{dtype} tensor of shape {shape:?} needs {expected} bytes, got {}",
                buffer.len()
            )));
        }
        Ok(Self {
            dtype,
            shape,
            buffer,
        })
    }

    pub fn from_slice<E: Element>(shape: Vec<i64>, data: &[E]) -> JitResult<Self> {
        let mut bytes = Vec::with_capacity(data.len() * E::DTYPE.size_in_bytes());
        for &element in data {
            element.write_bytes(&mut bytes);
        }
        Self::new(E::DTYPE, shape, bytes.into())
    }

    /// Copies the elements out, or `None` when `E` does not match the dtype.
    pub fn to_vec<E: Element>(&self) -> Option<Vec<E>> {
        if E::DTYPE != self.dtype {
            return None;
        }
        Some(
            self.buffer
                .chunks_exact(self.dtype.size_in_bytes())
                .map(E::read_bytes)
                .collect(),
        )
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn num_elements(&self) -> usize {
        self.buffer.len() / self.dtype.size_in_bytes()
    }

    pub fn buffer(&self) -> &Arc<[u8]> {
        &self.buffer
    }
}

impl fmt::Debug for DenseHostTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DenseHostTensor")
            .field("dtype", &self.dtype)
            .field("shape", &self.shape)
            .field("bytes", &self.buffer.len())
            .finish()
    }
}

/// Value carried by kernel argument and result async values.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelValue {
    /// Ordering token with no payload.
    Chain,
    Tensor(DenseHostTensor),
}

impl KernelValue {
    pub fn as_tensor(&self) -> Option<&DenseHostTensor> {
        match self {
            KernelValue::Tensor(tensor) => Some(tensor),
            KernelValue::Chain => None,
        }
    }

    pub fn is_chain(&self) -> bool {
        matches!(self, KernelValue::Chain)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            KernelValue::Chain => "chain",
            KernelValue::Tensor(_) => "tensor",
        }
    }
}

impl From<DenseHostTensor> for KernelValue {
    fn from(tensor: DenseHostTensor) -> Self {
        KernelValue::Tensor(tensor)
    }
}
