//! Control plane module - `$init` message and stdio I/O.
//!
//! The control plane uses JSON over stdio for the initial handshake.
//! After handshake, all communication happens on the data plane (pipe).
//!
//! # Workflow
//!
//! 1. Host creates pipe listener
//! 2. Host sends `$init` via stdout (JSON-RPC)
//! 3. Parent checks the schema tables and limits
//! 4. Parent connects to pipe
//! 5. Wire commands flow on the data plane

mod init;
mod stdio;

pub use init::{build_init_message, InitSchema, PROTOCOL_VERSION};
pub use stdio::write_stdout_line;
