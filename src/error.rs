//! Error types for webnn-wire.

use thiserror::Error;

use crate::object::ObjectType;

/// Main error type for all wire operations.
#[derive(Debug, Error)]
pub enum WireError {
    /// I/O error during pipe/socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (control plane only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error (operation parameters).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error (operation parameters).
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Malformed record, command or chunk sequence. Fatal to the connection.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The command was well formed but could not be applied.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A command referenced an id with no live object behind it.
    #[error("Unknown {ty:?} object id {id}")]
    UnknownObject { ty: ObjectType, id: u32 },

    /// An allocator invariant was violated (double free, id collision).
    #[error("Allocator error: {0}")]
    Allocator(String),

    /// A handle whose generation no longer matches the live object.
    #[error("Stale {ty:?} handle: id {id}, generation {generation}")]
    StaleHandle {
        ty: ObjectType,
        id: u32,
        generation: u32,
    },

    /// The transport could not provide space or flush.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection was torn down.
    #[error("Disconnected")]
    Disconnected,

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure limit reached - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl WireError {
    /// Whether this error must tear down the connection it occurred on.
    ///
    /// Validation-class errors (unknown ids, bad arguments) are reported per
    /// command; everything that means the byte stream or the id bookkeeping
    /// can no longer be trusted is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            WireError::Validation(_) | WireError::UnknownObject { .. } | WireError::StaleHandle { .. }
        )
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        WireError::Decode(message.into())
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        WireError::Validation(message.into())
    }
}

/// Result type alias using WireError.
pub type Result<T> = std::result::Result<T, WireError>;
