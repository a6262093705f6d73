//! Native-side errors and the wire-visible error enums.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type reported to API callers (error scopes, callbacks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorType {
    NoError = 0,
    Validation = 1,
    OutOfMemory = 2,
    Unknown = 3,
    DeviceLost = 4,
}

impl ErrorType {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ErrorType::NoError),
            1 => Some(ErrorType::Validation),
            2 => Some(ErrorType::OutOfMemory),
            3 => Some(ErrorType::Unknown),
            4 => Some(ErrorType::DeviceLost),
            _ => None,
        }
    }
}

/// Which errors an error scope captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorFilter {
    /// Captures nothing; errors pass through to the enclosing scope.
    None = 0,
    Validation = 1,
    OutOfMemory = 2,
}

impl ErrorFilter {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(ErrorFilter::None),
            1 => Some(ErrorFilter::Validation),
            2 => Some(ErrorFilter::OutOfMemory),
            _ => None,
        }
    }

    pub fn captures(self, ty: ErrorType) -> bool {
        matches!(
            (self, ty),
            (ErrorFilter::Validation, ErrorType::Validation)
                | (ErrorFilter::OutOfMemory, ErrorType::OutOfMemory)
        )
    }
}

/// Internal classification of native failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalErrorType {
    Validation,
    DeviceLost,
    Internal,
    Unimplemented,
    OutOfMemory,
}

impl InternalErrorType {
    /// Internal errors lose the device at the API level.
    pub fn to_error_type(self) -> ErrorType {
        match self {
            InternalErrorType::Validation => ErrorType::Validation,
            InternalErrorType::OutOfMemory => ErrorType::OutOfMemory,
            InternalErrorType::Internal | InternalErrorType::DeviceLost => ErrorType::DeviceLost,
            InternalErrorType::Unimplemented => ErrorType::Unknown,
        }
    }
}

impl From<ErrorType> for InternalErrorType {
    fn from(ty: ErrorType) -> Self {
        match ty {
            ErrorType::Validation => InternalErrorType::Validation,
            ErrorType::OutOfMemory => InternalErrorType::OutOfMemory,
            ErrorType::DeviceLost => InternalErrorType::DeviceLost,
            ErrorType::NoError | ErrorType::Unknown => InternalErrorType::Internal,
        }
    }
}

/// A failed native operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?} error: {message}")]
pub struct NativeError {
    pub kind: InternalErrorType,
    pub message: String,
}

impl NativeError {
    pub fn new(kind: InternalErrorType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(InternalErrorType::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(InternalErrorType::Internal, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(InternalErrorType::Unimplemented, message)
    }

    pub fn out_of_memory(message: impl Into<String>) -> Self {
        Self::new(InternalErrorType::OutOfMemory, message)
    }

    pub fn device_lost(message: impl Into<String>) -> Self {
        Self::new(InternalErrorType::DeviceLost, message)
    }

    pub fn error_type(&self) -> ErrorType {
        self.kind.to_error_type()
    }
}

/// Result type for native operations.
pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// Return a validation error unless `cond` holds.
macro_rules! ensure_valid {
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            return Err($crate::native::NativeError::validation(format!($($arg)+)));
        }
    };
}

pub(crate) use ensure_valid;
