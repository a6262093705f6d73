//! Operators: option structs plus validation and shape inference.
//!
//! An [`Operation`] is what travels inside a `GraphBuilderOperation`
//! command (as MessagePack). `infer` checks the operand count, element
//! types and shapes, and returns the descriptors of the outputs.

mod conv;
mod elementwise;
mod gemm;
mod reduce;
mod shape;

use serde::{Deserialize, Serialize};

use super::descriptor::OperandDescriptor;
use super::error::{ensure_valid, NativeResult};

pub use conv::{AutoPad, Conv2dOptions, FilterOperandLayout, InputOperandLayout, Pool2dOptions, RoundingType};
pub use elementwise::{BinaryKind, ClampOptions, UnaryKind};
pub use gemm::GemmOptions;
pub use reduce::{ReduceKind, ReduceOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolKind {
    Average,
    L2,
    Max,
}

/// One graph-builder operator call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Unary(UnaryKind),
    Binary(BinaryKind),
    Clamp(ClampOptions),
    LeakyRelu { alpha: f32 },
    /// Inputs: input, filter, optional bias.
    Conv2d(Conv2dOptions),
    Pool2d { kind: PoolKind, options: Pool2dOptions },
    Reshape { new_shape: Vec<i32> },
    Transpose { permutation: Option<Vec<i32>> },
    Concat { axis: u32 },
    /// Inputs: a, b, optional c.
    Gemm(GemmOptions),
    Reduce { kind: ReduceKind, options: ReduceOptions },
    /// `splits` of length one means that many equal parts.
    Split { splits: Vec<u32>, axis: i32 },
}

impl Operation {
    /// Short operator name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Unary(kind) => kind.name(),
            Operation::Binary(kind) => kind.name(),
            Operation::Clamp(_) => "clamp",
            Operation::LeakyRelu { .. } => "leakyRelu",
            Operation::Conv2d(_) => "conv2d",
            Operation::Pool2d { kind, .. } => match kind {
                PoolKind::Average => "averagePool2d",
                PoolKind::L2 => "l2Pool2d",
                PoolKind::Max => "maxPool2d",
            },
            Operation::Reshape { .. } => "reshape",
            Operation::Transpose { .. } => "transpose",
            Operation::Concat { .. } => "concat",
            Operation::Gemm(_) => "gemm",
            Operation::Reduce { kind, .. } => kind.name(),
            Operation::Split { .. } => "split",
        }
    }

    /// Whether the result is an operand array rather than one operand.
    pub fn has_multiple_outputs(&self) -> bool {
        matches!(self, Operation::Split { .. })
    }

    /// Number of outputs, known without looking at the inputs.
    pub fn output_count(&self) -> usize {
        match self {
            Operation::Split { splits, .. } if splits.len() == 1 => splits[0] as usize,
            Operation::Split { splits, .. } => splits.len(),
            _ => 1,
        }
    }

    /// Validate the inputs and infer the output descriptors.
    pub fn infer(&self, inputs: &[&OperandDescriptor]) -> NativeResult<Vec<OperandDescriptor>> {
        let (min, max) = self.input_count();
        ensure_valid!(
            inputs.len() >= min && inputs.len() <= max,
            "{} takes {} to {} inputs, got {}",
            self.name(),
            min,
            max,
            inputs.len()
        );
        let ty = inputs[0].ty;
        ensure_valid!(
            inputs.iter().all(|d| d.ty == ty),
            "{} inputs must share one element type",
            self.name()
        );

        let single = |desc: NativeResult<OperandDescriptor>| desc.map(|d| vec![d]);
        match self {
            Operation::Unary(kind) => single(elementwise::unary(*kind, inputs[0])),
            Operation::Binary(kind) => single(elementwise::binary(*kind, inputs[0], inputs[1])),
            Operation::Clamp(options) => single(elementwise::clamp(options, inputs[0])),
            Operation::LeakyRelu { .. } => Ok(vec![inputs[0].clone()]),
            Operation::Conv2d(options) => single(conv::conv2d(options, inputs[0], inputs[1], inputs.get(2).copied())),
            Operation::Pool2d { options, .. } => single(conv::pool2d(options, inputs[0])),
            Operation::Reshape { new_shape } => single(shape::reshape(inputs[0], new_shape)),
            Operation::Transpose { permutation } => single(shape::transpose(inputs[0], permutation.as_deref())),
            Operation::Concat { axis } => single(shape::concat(inputs, *axis)),
            Operation::Gemm(options) => single(gemm::gemm(options, inputs[0], inputs[1], inputs.get(2).copied())),
            Operation::Reduce { options, .. } => single(reduce::reduce(options, inputs[0])),
            Operation::Split { splits, axis } => shape::split(inputs[0], splits, *axis),
        }
    }

    fn input_count(&self) -> (usize, usize) {
        match self {
            Operation::Binary(_) => (2, 2),
            Operation::Conv2d(_) | Operation::Gemm(_) => (2, 3),
            Operation::Concat { .. } => (1, usize::MAX),
            _ => (1, 1),
        }
    }
}

/// Resolve a possibly negative axis against `rank`.
pub(crate) fn normalize_axis(axis: i32, rank: usize) -> NativeResult<usize> {
    let rank_i = rank as i64;
    let resolved = if axis < 0 { axis as i64 + rank_i } else { axis as i64 };
    ensure_valid!(
        resolved >= 0 && resolved < rank_i,
        "axis {} out of range for rank {}",
        axis,
        rank
    );
    Ok(resolved as usize)
}
