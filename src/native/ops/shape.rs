use super::normalize_axis;
use crate::native::descriptor::OperandDescriptor;
use crate::native::error::{ensure_valid, NativeError, NativeResult};

/// One `-1` entry is inferred from the remaining element count.
pub(super) fn reshape(input: &OperandDescriptor, new_shape: &[i32]) -> NativeResult<OperandDescriptor> {
    let total = input
        .element_count()
        .ok_or_else(|| NativeError::validation("reshape input has no valid size"))?;

    let mut inferred = None;
    let mut known = 1usize;
    for (i, &dim) in new_shape.iter().enumerate() {
        match dim {
            -1 => {
                ensure_valid!(inferred.is_none(), "reshape allows only one -1 entry");
                inferred = Some(i);
            }
            d if d > 0 => {
                known = known
                    .checked_mul(d as usize)
                    .ok_or_else(|| NativeError::validation("reshape size overflows"))?;
            }
            d => return Err(NativeError::validation(format!("invalid reshape dimension {}", d))),
        }
    }

    let mut dims = new_shape.to_vec();
    match inferred {
        Some(index) => {
            ensure_valid!(
                known != 0 && total % known == 0,
                "cannot infer reshape dimension: {} elements into {:?}",
                total,
                new_shape
            );
            dims[index] = i32::try_from(total / known)
                .map_err(|_| NativeError::validation("inferred dimension overflows"))?;
        }
        None => ensure_valid!(
            known == total,
            "reshape of {} elements into {:?} ({} elements)",
            total,
            new_shape,
            known
        ),
    }
    Ok(input.with_dimensions(dims))
}

/// Default permutation reverses the dimensions.
pub(super) fn transpose(input: &OperandDescriptor, permutation: Option<&[i32]>) -> NativeResult<OperandDescriptor> {
    let rank = input.rank();
    let permutation: Vec<i32> = match permutation {
        Some(p) => p.to_vec(),
        None => (0..rank as i32).rev().collect(),
    };
    ensure_valid!(
        permutation.len() == rank,
        "permutation length {} does not match rank {}",
        permutation.len(),
        rank
    );

    let mut seen = vec![false; rank];
    let mut dims = Vec::with_capacity(rank);
    for &axis in &permutation {
        ensure_valid!(
            axis >= 0 && (axis as usize) < rank && !seen[axis as usize],
            "{:?} is not a permutation of rank {}",
            permutation,
            rank
        );
        seen[axis as usize] = true;
        dims.push(input.dimensions[axis as usize]);
    }
    Ok(input.with_dimensions(dims))
}

pub(super) fn concat(inputs: &[&OperandDescriptor], axis: u32) -> NativeResult<OperandDescriptor> {
    let first = inputs[0];
    let axis = axis as usize;
    ensure_valid!(axis < first.rank(), "concat axis {} out of range for rank {}", axis, first.rank());

    let mut dims = first.dimensions.clone();
    for other in &inputs[1..] {
        ensure_valid!(other.rank() == first.rank(), "concat inputs must share one rank");
        for (i, (&a, &b)) in first.dimensions.iter().zip(&other.dimensions).enumerate() {
            if i != axis {
                ensure_valid!(a == b, "concat inputs differ outside axis {} at dimension {}", axis, i);
            }
        }
        dims[axis] = dims[axis]
            .checked_add(other.dimensions[axis])
            .ok_or_else(|| NativeError::validation("concat size overflows"))?;
    }
    Ok(first.with_dimensions(dims))
}

pub(super) fn split(input: &OperandDescriptor, splits: &[u32], axis: i32) -> NativeResult<Vec<OperandDescriptor>> {
    let axis = normalize_axis(axis, input.rank())?;
    let extent = input.dimensions[axis] as i64;
    ensure_valid!(!splits.is_empty(), "split needs at least one split value");

    let sizes: Vec<i64> = if splits.len() == 1 {
        let parts = splits[0] as i64;
        ensure_valid!(
            parts > 0 && extent % parts == 0,
            "dimension {} cannot be split into {} equal parts",
            extent,
            parts
        );
        vec![extent / parts; parts as usize]
    } else {
        let sizes: Vec<i64> = splits.iter().map(|&s| s as i64).collect();
        ensure_valid!(sizes.iter().all(|&s| s > 0), "split sizes must be positive");
        ensure_valid!(
            sizes.iter().sum::<i64>() == extent,
            "split sizes {:?} do not sum to {}",
            splits,
            extent
        );
        sizes
    };

    Ok(sizes
        .into_iter()
        .map(|size| {
            let mut dims = input.dimensions.clone();
            dims[axis] = size as i32;
            input.with_dimensions(dims)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::descriptor::OperandType;

    fn desc(dims: &[i32]) -> OperandDescriptor {
        OperandDescriptor::new(OperandType::Float32, dims.to_vec())
    }

    #[test]
    fn test_reshape_infers_minus_one() {
        assert_eq!(reshape(&desc(&[2, 3, 4]), &[-1, 4]).unwrap().dimensions, vec![6, 4]);
        assert!(reshape(&desc(&[2, 3]), &[-1, -1]).is_err());
        assert!(reshape(&desc(&[2, 3]), &[4, -1]).is_err());
        assert!(reshape(&desc(&[2, 3]), &[5]).is_err());
        assert!(reshape(&desc(&[2, 3]), &[0, 6]).is_err());
    }

    #[test]
    fn test_transpose() {
        assert_eq!(transpose(&desc(&[1, 2, 3]), None).unwrap().dimensions, vec![3, 2, 1]);
        assert_eq!(
            transpose(&desc(&[1, 2, 3]), Some(&[0, 2, 1])).unwrap().dimensions,
            vec![1, 3, 2]
        );
        assert!(transpose(&desc(&[1, 2, 3]), Some(&[0, 0, 1])).is_err());
        assert!(transpose(&desc(&[1, 2, 3]), Some(&[0, 1])).is_err());
    }

    #[test]
    fn test_concat() {
        let a = desc(&[2, 3]);
        let b = desc(&[2, 5]);
        assert_eq!(concat(&[&a, &b], 1).unwrap().dimensions, vec![2, 8]);
        assert!(concat(&[&a, &b], 0).is_err());
        assert!(concat(&[&a], 2).is_err());
    }

    #[test]
    fn test_split_equal_and_sized() {
        let input = desc(&[6, 2]);
        let equal = split(&input, &[3], 0).unwrap();
        assert_eq!(equal.len(), 3);
        assert!(equal.iter().all(|d| d.dimensions == vec![2, 2]));

        let sized = split(&input, &[1, 5], -2).unwrap();
        assert_eq!(sized[1].dimensions, vec![5, 2]);

        assert!(split(&input, &[4], 0).is_err());
        assert!(split(&input, &[2, 2], 0).is_err());
    }
}
