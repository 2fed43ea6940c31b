//! Argument descriptors passed to compiled executables.

use std::fmt;
use std::sync::Arc;

use super::tensor::{DType, DenseHostTensor, KernelValue, num_elements};
use crate::error::{JitError, JitResult};
use crate::runtime::async_value::AsyncValue;

/// Strided view over a shared host buffer.
///
/// Offsets and strides are counted in elements, not bytes.
#[derive(Clone, PartialEq)]
pub struct MemrefDesc {
    dtype: DType,
    data: Arc<[u8]>,
    offset: usize,
    sizes: Vec<i64>,
    strides: Vec<i64>,
}

impl MemrefDesc {
    pub fn new(
        dtype: DType,
        data: Arc<[u8]>,
        offset: usize,
        sizes: Vec<i64>,
        strides: Vec<i64>,
    ) -> JitResult<Self> {
        if sizes.len() != strides.len() {
            return Err(JitError::InvalidTensor(format!(
                "memref rank mismatch: {} sizes, {} strides",
                sizes.len(),
                strides.len()
            )));
        }
        if num_elements(&sizes).is_none() {
            return Err(JitError::InvalidTensor(format!("bad memref sizes {sizes:?}")));
        }
        Ok(Self {
            dtype,
            data,
            offset,
            sizes,
            strides,
        })
    }

    /// Contiguous descriptor sharing the tensor's buffer.
    pub fn from_tensor(tensor: &DenseHostTensor) -> Self {
        let sizes = tensor.shape().to_vec();
        let strides = row_major_strides(&sizes);
        Self {
            dtype: tensor.dtype(),
            data: Arc::clone(tensor.buffer()),
            offset: 0,
            sizes,
            strides,
        }
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn data(&self) -> &Arc<[u8]> {
        &self.data
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn sizes(&self) -> &[i64] {
        &self.sizes
    }

    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.sizes.len()
    }

    pub fn num_elements(&self) -> usize {
        num_elements(&self.sizes).unwrap_or(0)
    }

    pub fn is_contiguous(&self) -> bool {
        self.num_elements() <= 1 || self.strides == row_major_strides(&self.sizes)
    }

    /// Materializes a dense tensor; shares the buffer when the view covers it
    /// exactly.
    pub fn to_dense_tensor(&self) -> JitResult<DenseHostTensor> {
        if !self.is_contiguous() {
            return Err(JitError::InvalidTensor(format!(
                "strides {:?} are not row-major for sizes {:?}",
                self.strides, self.sizes
            )));
        }
        let elem = self.dtype.size_in_bytes();
        let overflow = || {
            JitError::InvalidTensor(format!(
                "memref view at offset {} with sizes {:?} overflows usize",
                self.offset, self.sizes
            ))
        };
        let start = self.offset.checked_mul(elem).ok_or_else(overflow)?;
        let end = self
            .num_elements()
            .checked_mul(elem)
            .and_then(|len| start.checked_add(len))
            .ok_or_else(overflow)?;
        if end > self.data.len() {
            return Err(JitError::InvalidTensor(format!(
                "memref view [{start}, {end}) exceeds a {} byte buffer",
                self.data.len()
            )));
        }
        let buffer = if start == 0 && end == self.data.len() {
            Arc::clone(&self.data)
        } else {
            Arc::from(&self.data[start..end])
        };
        DenseHostTensor::new(self.dtype, self.sizes.clone(), buffer)
    }
}

impl fmt::Debug for MemrefDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemrefDesc")
            .field("dtype", &self.dtype)
            .field("offset", &self.offset)
            .field("sizes", &self.sizes)
            .field("strides", &self.strides)
            .finish_non_exhaustive()
    }
}

pub fn row_major_strides(sizes: &[i64]) -> Vec<i64> {
    let mut strides = vec![1; sizes.len()];
    for i in (0..sizes.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * sizes[i + 1].max(1);
    }
    strides
}

/// Converts host values into argument descriptors.
pub trait ArgumentMarshaler: Send + Sync {
    fn to_descriptor(&self, index: usize, value: &KernelValue) -> JitResult<MemrefDesc>;
}

/// Marshals dense host tensors; every other value is rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct TensorMarshaler;

impl ArgumentMarshaler for TensorMarshaler {
    fn to_descriptor(&self, index: usize, value: &KernelValue) -> JitResult<MemrefDesc> {
        match value {
            KernelValue::Tensor(tensor) => Ok(MemrefDesc::from_tensor(tensor)),
            other => Err(JitError::marshal(
                index,
                format!("{} operands cannot be passed as memrefs", other.kind()),
            )),
        }
    }
}

/// Marshals every operand, stopping at the first failure.
///
/// Operands must already be available. An operand resolved to an error
/// yields that error unchanged.
pub fn marshal_operands(
    marshaler: &dyn ArgumentMarshaler,
    operands: &[AsyncValue<KernelValue>],
) -> JitResult<Vec<MemrefDesc>> {
    let mut memrefs = Vec::with_capacity(operands.len());
    for (index, operand) in operands.iter().enumerate() {
        match operand.get() {
            Some(Ok(value)) => memrefs.push(marshaler.to_descriptor(index, value)?),
            Some(Err(err)) => return Err(err.clone()),
            None => return Err(JitError::marshal(index, "operand is not available")),
        }
    }
    Ok(memrefs)
}
