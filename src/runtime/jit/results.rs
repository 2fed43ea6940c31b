//! Mapping raw executable outputs onto typed result values.

use std::fmt;

use tracing::warn;

use super::executable::ResultType;
use super::memref::MemrefDesc;
use super::tensor::{DType, KernelValue};
use crate::error::{JitError, JitResult};
use crate::runtime::async_value::AsyncValue;

/// Value produced by an executable for one result position.
#[derive(Clone)]
pub enum RawValue {
    /// Completion token, possibly still pending.
    AsyncToken(AsyncValue<()>),
    /// Buffer produced asynchronously by the executable.
    AsyncMemref(AsyncValue<MemrefDesc>),
    /// Buffer already materialized when the call returns.
    Memref(MemrefDesc),
}

impl RawValue {
    pub fn kind(&self) -> &'static str {
        match self {
            RawValue::AsyncToken(_) => "async token",
            RawValue::AsyncMemref(_) => "async memref",
            RawValue::Memref(_) => "memref",
        }
    }
}

impl fmt::Debug for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Receives raw values from a running executable, indexed by result position.
pub trait ResultSink {
    fn return_value(&mut self, index: usize, value: RawValue);
}

/// Converts a raw value for a declared result type.
///
/// Returns the value back when the conversion does not apply so the next one
/// can be tried.
pub type ConversionFn =
    fn(index: usize, ty: &ResultType, value: RawValue) -> Result<AsyncValue<KernelValue>, RawValue>;

pub fn return_async_token(
    _index: usize,
    ty: &ResultType,
    value: RawValue,
) -> Result<AsyncValue<KernelValue>, RawValue> {
    match (ty, value) {
        (ResultType::AsyncToken, RawValue::AsyncToken(token)) => {
            Ok(token.map(|_| Ok(KernelValue::Chain)))
        }
        (_, value) => Err(value),
    }
}

pub fn return_async_memref_as_dense_host_tensor(
    index: usize,
    ty: &ResultType,
    value: RawValue,
) -> Result<AsyncValue<KernelValue>, RawValue> {
    match (*ty, value) {
        (ResultType::AsyncMemref { dtype, rank }, RawValue::AsyncMemref(memref)) => {
            Ok(memref.map(move |memref| memref_to_tensor(index, dtype, rank, memref)))
        }
        (_, value) => Err(value),
    }
}

pub fn return_memref_as_dense_host_tensor(
    index: usize,
    ty: &ResultType,
    value: RawValue,
) -> Result<AsyncValue<KernelValue>, RawValue> {
    match (*ty, value) {
        (ResultType::Memref { dtype, rank }, RawValue::Memref(memref)) => Ok(AsyncValue::from(
            memref_to_tensor(index, dtype, rank, &memref),
        )),
        (_, value) => Err(value),
    }
}

fn memref_to_tensor(
    index: usize,
    dtype: DType,
    rank: usize,
    memref: &MemrefDesc,
) -> JitResult<KernelValue> {
    if memref.dtype() != dtype || memref.rank() != rank {
        return Err(JitError::conversion(
            index,
            format!(
                "declared {rank}d {dtype} buffer, got {}d {}",
                memref.rank(),
                memref.dtype()
            ),
        ));
    }
    memref
        .to_dense_tensor()
        .map(KernelValue::Tensor)
        .map_err(|err| JitError::conversion(index, err.to_string()))
}

/// Conversions registered by default, in the order they are tried.
pub fn default_conversions() -> Vec<ConversionFn> {
    vec![
        return_async_token as ConversionFn,
        return_async_memref_as_dense_host_tensor,
        return_memref_as_dense_host_tensor,
    ]
}

/// [`ResultSink`] that stores one converted async value per result.
pub struct ReturnValueConverter<'a> {
    types: &'a [ResultType],
    conversions: &'a [ConversionFn],
    results: Vec<Option<AsyncValue<KernelValue>>>,
}

impl<'a> ReturnValueConverter<'a> {
    pub fn new(types: &'a [ResultType], conversions: &'a [ConversionFn]) -> Self {
        Self {
            types,
            conversions,
            results: vec![None; types.len()],
        }
    }

    /// Final results; any position the executable never returned resolves to a
    /// conversion error.
    pub fn finish(self) -> Vec<AsyncValue<KernelValue>> {
        self.results
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    AsyncValue::error(JitError::conversion(index, "executable returned no value"))
                })
            })
            .collect()
    }

    /// One error per declared result, discarding anything already returned.
    pub fn fail(self, error: &JitError) -> Vec<AsyncValue<KernelValue>> {
        error_results(self.types.len(), error)
    }
}

impl ResultSink for ReturnValueConverter<'_> {
    fn return_value(&mut self, index: usize, value: RawValue) {
        let Some(ty) = self.types.get(index) else {
            warn!(index, results = self.types.len(), "executable returned an out of range result");
            return;
        };
        if self.results[index].is_some() {
            warn!(index, "executable returned a result twice");
            return;
        }

        let mut value = value;
        for conversion in self.conversions {
            match conversion(index, ty, value) {
                Ok(converted) => {
                    self.results[index] = Some(converted);
                    return;
                }
                Err(unconverted) => value = unconverted,
            }
        }

        self.results[index] = Some(AsyncValue::error(JitError::conversion(
            index,
            format!("no conversion from {} to {ty}", value.kind()),
        )));
    }
}

pub fn error_results(count: usize, error: &JitError) -> Vec<AsyncValue<KernelValue>> {
    (0..count).map(|_| AsyncValue::error(error.clone())).collect()
}
