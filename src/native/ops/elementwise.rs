use serde::{Deserialize, Serialize};

use crate::native::descriptor::OperandDescriptor;
use crate::native::error::{ensure_valid, NativeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryKind {
    Abs,
    Ceil,
    Cos,
    Exp,
    Floor,
    HardSwish,
    Log,
    Neg,
    Relu,
    Sigmoid,
    Sin,
    Softmax,
    Tan,
    Tanh,
}

impl UnaryKind {
    pub fn name(self) -> &'static str {
        match self {
            UnaryKind::Abs => "abs",
            UnaryKind::Ceil => "ceil",
            UnaryKind::Cos => "cos",
            UnaryKind::Exp => "exp",
            UnaryKind::Floor => "floor",
            UnaryKind::HardSwish => "hardSwish",
            UnaryKind::Log => "log",
            UnaryKind::Neg => "neg",
            UnaryKind::Relu => "relu",
            UnaryKind::Sigmoid => "sigmoid",
            UnaryKind::Sin => "sin",
            UnaryKind::Softmax => "softmax",
            UnaryKind::Tan => "tan",
            UnaryKind::Tanh => "tanh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
    Pow,
    MatMul,
}

impl BinaryKind {
    pub fn name(self) -> &'static str {
        match self {
            BinaryKind::Add => "add",
            BinaryKind::Sub => "sub",
            BinaryKind::Mul => "mul",
            BinaryKind::Div => "div",
            BinaryKind::Max => "max",
            BinaryKind::Min => "min",
            BinaryKind::Pow => "pow",
            BinaryKind::MatMul => "matmul",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClampOptions {
    pub min_value: Option<f32>,
    pub max_value: Option<f32>,
}

pub(super) fn unary(kind: UnaryKind, input: &OperandDescriptor) -> NativeResult<OperandDescriptor> {
    if kind == UnaryKind::Softmax {
        ensure_valid!(input.rank() == 2, "softmax input must be 2-D, got rank {}", input.rank());
    }
    Ok(input.clone())
}

pub(super) fn binary(
    kind: BinaryKind,
    a: &OperandDescriptor,
    b: &OperandDescriptor,
) -> NativeResult<OperandDescriptor> {
    if kind == BinaryKind::MatMul {
        return matmul(a, b);
    }
    let dims = broadcast_shapes(&a.dimensions, &b.dimensions)?;
    Ok(a.with_dimensions(dims))
}

pub(super) fn clamp(options: &ClampOptions, input: &OperandDescriptor) -> NativeResult<OperandDescriptor> {
    if let (Some(min), Some(max)) = (options.min_value, options.max_value) {
        ensure_valid!(min <= max, "clamp min {} exceeds max {}", min, max);
    }
    Ok(input.clone())
}

/// Numpy-style bidirectional broadcasting.
pub(crate) fn broadcast_shapes(a: &[i32], b: &[i32]) -> NativeResult<Vec<i32>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        ensure_valid!(
            da == db || da == 1 || db == 1,
            "shapes {:?} and {:?} are not broadcastable",
            a,
            b
        );
        out[i] = da.max(db);
    }
    Ok(out)
}

fn matmul(a: &OperandDescriptor, b: &OperandDescriptor) -> NativeResult<OperandDescriptor> {
    ensure_valid!(a.rank() >= 1 && b.rank() >= 1, "matmul inputs must be at least 1-D");

    let mut a_dims = a.dimensions.clone();
    let mut b_dims = b.dimensions.clone();
    let a_vector = a_dims.len() == 1;
    let b_vector = b_dims.len() == 1;
    if a_vector {
        a_dims.insert(0, 1);
    }
    if b_vector {
        b_dims.push(1);
    }

    let (a_batch, a_mat) = a_dims.split_at(a_dims.len() - 2);
    let (b_batch, b_mat) = b_dims.split_at(b_dims.len() - 2);
    ensure_valid!(
        a_mat[1] == b_mat[0],
        "matmul inner dimensions differ: {:?} x {:?}",
        a.dimensions,
        b.dimensions
    );

    let mut dims = broadcast_shapes(a_batch, b_batch)?;
    if !a_vector {
        dims.push(a_mat[0]);
    }
    if !b_vector {
        dims.push(b_mat[1]);
    }
    Ok(a.with_dimensions(dims))
}
