// Shape specialization of compiled executables
pub mod key;

pub use key::{OperandShape, ShapeSignature};

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::executable::ExecutableRef;
use crate::error::JitResult;

/// Produces an executable specialized for concrete operand shapes.
pub trait Specializer: Send + Sync {
    fn specialize(
        &self,
        generic: &ExecutableRef,
        signature: &ShapeSignature,
    ) -> JitResult<ExecutableRef>;
}

/// When a compiled handle creates shape-specialized executables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecializationMode {
    /// Always run the generic executable.
    Disabled,
    /// Specialize only executables with dynamic operand dimensions.
    #[default]
    Enabled,
    /// Specialize for every distinct operand shape.
    Always,
}

impl FromStr for SpecializationMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(SpecializationMode::Disabled),
            "enabled" | "on" => Ok(SpecializationMode::Enabled),
            "always" => Ok(SpecializationMode::Always),
            other => Err(format!("unknown specialization mode `{other}`")),
        }
    }
}
