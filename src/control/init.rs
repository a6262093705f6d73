//! `$init` message builder.
//!
//! The `$init` message is sent via stdout to tell the parent:
//! - The pipe path for data plane connection
//! - The wire schema (object types and command kinds with their values)
//! - Transport limits and the protocol version
//!
//! # Example
//!
//! ```
//! use webnn_wire::control::{build_init_message, InitSchema};
//! use webnn_wire::WireConfig;
//!
//! let json = build_init_message("/tmp/webnn.sock", &InitSchema::wire(), &WireConfig::default()).unwrap();
//! assert!(json.contains("$init"));
//! ```

use std::collections::BTreeMap;

use serde_json::json;

use crate::config::WireConfig;
use crate::error::Result;
use crate::object::ObjectType;
use crate::protocol::{CommandKind, ReturnCommandKind};

/// Protocol version string.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Name → wire value tables the parent checks before connecting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitSchema {
    pub objects: BTreeMap<String, u32>,
    pub commands: BTreeMap<String, u32>,
    pub returns: BTreeMap<String, u32>,
}

impl InitSchema {
    /// Create a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// The schema this crate speaks.
    pub fn wire() -> Self {
        Self {
            objects: ObjectType::ALL
                .iter()
                .map(|ty| (ty.name().to_string(), ty.as_u32()))
                .collect(),
            commands: CommandKind::ALL
                .iter()
                .map(|kind| (kind.name().to_string(), *kind as u32))
                .collect(),
            returns: ReturnCommandKind::ALL
                .iter()
                .map(|kind| (kind.name().to_string(), *kind as u32))
                .collect(),
        }
    }

    pub fn command(&self, name: &str) -> Option<u32> {
        self.commands.get(name).copied()
    }

    pub fn object(&self, name: &str) -> Option<u32> {
        self.objects.get(name).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.commands.is_empty() && self.returns.is_empty()
    }
}

/// Build the `$init` JSON-RPC message.
///
/// Returns a single line of JSON ready to be written to stdout.
pub fn build_init_message(pipe_path: &str, schema: &InitSchema, config: &WireConfig) -> Result<String> {
    let msg = json!({
        "jsonrpc": "2.0",
        "method": "$init",
        "params": {
            "pipe": pipe_path,
            "schema": {
                "objects": schema.objects,
                "commands": schema.commands,
                "returns": schema.returns,
            },
            "maxAllocationSize": config.max_allocation_size,
            "maxCommandSize": config.max_command_size,
            "version": PROTOCOL_VERSION
        }
    });

    Ok(serde_json::to_string(&msg)?)
}
