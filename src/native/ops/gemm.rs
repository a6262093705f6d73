use serde::{Deserialize, Serialize};

use crate::native::descriptor::OperandDescriptor;
use crate::native::error::{ensure_valid, NativeResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GemmOptions {
    pub alpha: f32,
    pub beta: f32,
    pub a_transpose: bool,
    pub b_transpose: bool,
}

impl Default for GemmOptions {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            beta: 1.0,
            a_transpose: false,
            b_transpose: false,
        }
    }
}

/// `alpha * A * B + beta * C`, with C broadcast to `[M, N]`.
pub(super) fn gemm(
    options: &GemmOptions,
    a: &OperandDescriptor,
    b: &OperandDescriptor,
    c: Option<&OperandDescriptor>,
) -> NativeResult<OperandDescriptor> {
    ensure_valid!(a.rank() == 2 && b.rank() == 2, "gemm inputs must be 2-D");

    let (m, ka) = if options.a_transpose {
        (a.dimensions[1], a.dimensions[0])
    } else {
        (a.dimensions[0], a.dimensions[1])
    };
    let (kb, n) = if options.b_transpose {
        (b.dimensions[1], b.dimensions[0])
    } else {
        (b.dimensions[0], b.dimensions[1])
    };
    ensure_valid!(ka == kb, "gemm inner dimensions differ: {} vs {}", ka, kb);

    if let Some(c) = c {
        ensure_valid!(c.rank() <= 2, "gemm c must be at most 2-D");
        let target = [m, n];
        let offset = 2 - c.rank();
        for (i, &dim) in c.dimensions.iter().enumerate() {
            ensure_valid!(
                dim == 1 || dim == target[offset + i],
                "gemm c {:?} does not broadcast to [{}, {}]",
                c.dimensions,
                m,
                n
            );
        }
    }
    Ok(a.with_dimensions(vec![m, n]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::descriptor::OperandType;

    fn desc(dims: &[i32]) -> OperandDescriptor {
        OperandDescriptor::new(OperandType::Float32, dims.to_vec())
    }

    #[test]
    fn test_gemm_transposes() {
        let options = GemmOptions {
            a_transpose: true,
            ..Default::default()
        };
        let out = gemm(&options, &desc(&[3, 2]), &desc(&[3, 4]), Some(&desc(&[4]))).unwrap();
        assert_eq!(out.dimensions, vec![2, 4]);
    }

    #[test]
    fn test_gemm_rejects_bad_c() {
        assert!(gemm(&GemmOptions::default(), &desc(&[2, 3]), &desc(&[3, 4]), Some(&desc(&[3]))).is_err());
        assert!(gemm(&GemmOptions::default(), &desc(&[2, 3]), &desc(&[2, 4]), None).is_err());
    }
}
