use serde::{Deserialize, Serialize};

use super::normalize_axis;
use crate::native::descriptor::OperandDescriptor;
use crate::native::error::{ensure_valid, NativeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceKind {
    L1,
    L2,
    Max,
    Mean,
    Min,
    Product,
    Sum,
}

impl ReduceKind {
    pub fn name(self) -> &'static str {
        match self {
            ReduceKind::L1 => "reduceL1",
            ReduceKind::L2 => "reduceL2",
            ReduceKind::Max => "reduceMax",
            ReduceKind::Mean => "reduceMean",
            ReduceKind::Min => "reduceMin",
            ReduceKind::Product => "reduceProduct",
            ReduceKind::Sum => "reduceSum",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReduceOptions {
    /// Defaults to every axis. Negative values count from the end.
    pub axes: Option<Vec<i32>>,
    pub keep_dimensions: bool,
}

pub(super) fn reduce(options: &ReduceOptions, input: &OperandDescriptor) -> NativeResult<OperandDescriptor> {
    let rank = input.rank();
    let mut reduced = vec![false; rank];
    match &options.axes {
        Some(axes) => {
            for &axis in axes {
                let axis = normalize_axis(axis, rank)?;
                ensure_valid!(!reduced[axis], "axis {} reduced twice", axis);
                reduced[axis] = true;
            }
        }
        None => reduced.iter_mut().for_each(|r| *r = true),
    }

    let dims = input
        .dimensions
        .iter()
        .zip(&reduced)
        .filter_map(|(&dim, &is_reduced)| match (is_reduced, options.keep_dimensions) {
            (false, _) => Some(dim),
            (true, true) => Some(1),
            (true, false) => None,
        })
        .collect();
    Ok(input.with_dimensions(dims))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::descriptor::OperandType;

    fn desc(dims: &[i32]) -> OperandDescriptor {
        OperandDescriptor::new(OperandType::Float32, dims.to_vec())
    }

    #[test]
    fn test_reduce_axes() {
        let options = ReduceOptions {
            axes: Some(vec![0, -1]),
            keep_dimensions: false,
        };
        assert_eq!(reduce(&options, &desc(&[2, 3, 4])).unwrap().dimensions, vec![3]);

        let keep = ReduceOptions {
            keep_dimensions: true,
            ..options
        };
        assert_eq!(reduce(&keep, &desc(&[2, 3, 4])).unwrap().dimensions, vec![1, 3, 1]);
    }

    #[test]
    fn test_reduce_all_axes_by_default() {
        let out = reduce(&ReduceOptions::default(), &desc(&[2, 3])).unwrap();
        assert!(out.dimensions.is_empty());
    }

    #[test]
    fn test_reduce_rejects_duplicate_axis() {
        let options = ReduceOptions {
            axes: Some(vec![1, -1]),
            keep_dimensions: false,
        };
        assert!(reduce(&options, &desc(&[2, 3])).is_err());
    }
}
