use ahash::AHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::runtime::jit::executable::OperandType;
use crate::runtime::jit::memref::MemrefDesc;
use crate::runtime::jit::tensor::DType;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperandShape {
    pub dtype: DType,
    pub sizes: Vec<i64>,
}

/// Concrete operand shapes identifying one specialized executable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShapeSignature {
    operands: Vec<OperandShape>,
}

impl ShapeSignature {
    pub fn from_operands(memrefs: &[MemrefDesc]) -> Self {
        let operands = memrefs
            .iter()
            .map(|memref| OperandShape {
                dtype: memref.dtype(),
                sizes: memref.sizes().to_vec(),
            })
            .collect();
        Self { operands }
    }

    pub fn operands(&self) -> &[OperandShape] {
        &self.operands
    }

    /// Fully static operand types for a specialized signature.
    pub fn operand_types(&self) -> Vec<OperandType> {
        self.operands
            .iter()
            .map(|shape| OperandType::fixed(shape.dtype, &shape.sizes))
            .collect()
    }

    /// Stable within a process; used for logging, not for map identity.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = AHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    pub fn to_string_key(&self) -> String {
        let shapes = self
            .operands
            .iter()
            .map(|shape| {
                let dims = shape
                    .sizes
                    .iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join("x");
                if dims.is_empty() {
                    shape.dtype.to_string()
                } else {
                    format!("{dims}x{}", shape.dtype)
                }
            })
            .collect::<Vec<_>>()
            .join(",");
        format!("<{}>_{:x}", shapes, self.fingerprint())
    }
}

impl fmt::Display for ShapeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_key())
    }
}
