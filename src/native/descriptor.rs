//! Operand descriptors: element type plus dimensions.

use serde::{Deserialize, Serialize};

use super::error::{ensure_valid, NativeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum OperandType {
    Float32 = 0,
    Float16 = 1,
    Int32 = 2,
    Uint32 = 3,
    Int8 = 4,
    Uint8 = 5,
}

impl OperandType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(OperandType::Float32),
            1 => Some(OperandType::Float16),
            2 => Some(OperandType::Int32),
            3 => Some(OperandType::Uint32),
            4 => Some(OperandType::Int8),
            5 => Some(OperandType::Uint8),
            _ => None,
        }
    }

    pub fn byte_size(self) -> usize {
        match self {
            OperandType::Float32 | OperandType::Int32 | OperandType::Uint32 => 4,
            OperandType::Float16 => 2,
            OperandType::Int8 | OperandType::Uint8 => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperandDescriptor {
    pub ty: OperandType,
    pub dimensions: Vec<i32>,
}

impl OperandDescriptor {
    pub fn new(ty: OperandType, dimensions: impl Into<Vec<i32>>) -> Self {
        Self {
            ty,
            dimensions: dimensions.into(),
        }
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Number of elements, or `None` on overflow or a non-positive dimension.
    pub fn element_count(&self) -> Option<usize> {
        self.dimensions.iter().try_fold(1usize, |acc, &d| {
            if d <= 0 {
                None
            } else {
                acc.checked_mul(d as usize)
            }
        })
    }

    pub fn byte_length(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.ty.byte_size())
    }

    /// Every dimension must be positive and the total size representable.
    pub fn validate(&self) -> NativeResult<()> {
        ensure_valid!(
            self.dimensions.iter().all(|&d| d > 0),
            "dimensions {:?} must all be positive",
            self.dimensions
        );
        ensure_valid!(
            self.byte_length().is_some(),
            "dimensions {:?} overflow",
            self.dimensions
        );
        Ok(())
    }

    /// Same element type, new shape.
    pub fn with_dimensions(&self, dimensions: Vec<i32>) -> Self {
        Self {
            ty: self.ty,
            dimensions,
        }
    }
}
