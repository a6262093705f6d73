//! MsgPack codec using `rmp-serde`.
//!
//! Operator option dictionaries travel as one MsgPack blob inside a
//! `GraphBuilderOperation` command. Always use `to_vec_named`: option
//! structs are encoded as maps so a peer built from another schema revision
//! still finds fields by name rather than by position.

use crate::error::{Result, WireError};

/// MessagePack codec for structured command arguments.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Decode an argument received from a peer.
    ///
    /// The blob has already been bounds-checked, so a failure here is a bad
    /// argument rather than a broken stream.
    pub fn decode_argument<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        rmp_serde::from_slice(bytes).map_err(|e| WireError::validation(format!("invalid argument: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::ops::{
        AutoPad, BinaryKind, Conv2dOptions, Operation, PoolKind, Pool2dOptions, ReduceKind, ReduceOptions,
        RoundingType,
    };

    #[test]
    fn test_operation_roundtrip() {
        let operations = [
            Operation::Binary(BinaryKind::MatMul),
            Operation::Conv2d(Conv2dOptions {
                strides: vec![2, 2],
                auto_pad: AutoPad::SameUpper,
                groups: 1,
                ..Default::default()
            }),
            Operation::Pool2d {
                kind: PoolKind::Max,
                options: Pool2dOptions {
                    window_dimensions: Some(vec![3, 3]),
                    rounding_type: RoundingType::Ceil,
                    ..Default::default()
                },
            },
            Operation::Reduce {
                kind: ReduceKind::Mean,
                options: ReduceOptions {
                    axes: Some(vec![-1]),
                    keep_dimensions: true,
                },
            },
            Operation::Transpose { permutation: None },
        ];
        for operation in operations {
            let encoded = MsgPackCodec::encode(&operation).unwrap();
            let decoded: Operation = MsgPackCodec::decode(&encoded).unwrap();
            assert_eq!(decoded, operation);
        }
    }

    #[test]
    fn test_to_vec_named_produces_map_format() {
        let encoded = MsgPackCodec::encode(&ReduceOptions {
            axes: None,
            keep_dimensions: false,
        })
        .unwrap();

        // fixmap with 2 entries, not fixarray (0x92)
        assert_eq!(encoded[0], 0x82, "Expected map format, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_decode_argument_is_validation_error() {
        let err = MsgPackCodec::decode_argument::<Operation>(b"not valid msgpack").unwrap_err();
        assert!(matches!(err, WireError::Validation(_)));
        assert!(!err.is_fatal());

        let err = MsgPackCodec::decode::<Operation>(b"\xc1").unwrap_err();
        assert!(matches!(err, WireError::MsgPackDecode(_)));
    }
}
