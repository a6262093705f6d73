//! Connection configuration shared by client and server.

use crate::protocol::{DEFAULT_MAX_ALLOCATION_SIZE, DEFAULT_MAX_COMMAND_SIZE};

/// What a per-command validation error does to the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Answer with a `CommandError` and keep going.
    #[default]
    Report,
    /// Answer, then tear the connection down.
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireConfig {
    /// Largest single transport allocation.
    pub max_allocation_size: usize,
    /// Largest reassembled command accepted from the peer.
    pub max_command_size: u32,
    pub error_policy: ErrorPolicy,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_allocation_size: DEFAULT_MAX_ALLOCATION_SIZE,
            max_command_size: DEFAULT_MAX_COMMAND_SIZE,
            error_policy: ErrorPolicy::Report,
        }
    }
}

impl WireConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transport allocation size.
    ///
    /// Default: 1 MB
    pub fn max_allocation_size(mut self, size: usize) -> Self {
        self.max_allocation_size = size;
        self
    }

    /// Set the reassembled command size limit.
    ///
    /// Default: 256 MB
    pub fn max_command_size(mut self, size: u32) -> Self {
        self.max_command_size = size;
        self
    }

    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }
}
