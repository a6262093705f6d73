//! Stdio I/O for control plane.
//!
//! The control plane uses stdout for the one-line `$init` message.
//!
//! # Important
//!
//! - **stdout**: JSON-RPC messages (one per line)
//! - **stderr**: Logs, debug output (not parsed by parent)
//! - **Never use `println!`**: It may add `\r\n` on Windows

use std::io::Write;

/// Write a line to stdout (Control Plane).
///
/// Writes the string followed by a single `\n` and flushes. Logging must
/// go to stderr, the parent reads stdout line by line.
pub fn write_stdout_line(line: &str) -> std::io::Result<()> {
    write_line(&mut std::io::stdout().lock(), line)
}

fn write_line<W: Write>(out: &mut W, line: &str) -> std::io::Result<()> {
    out.write_all(line.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}
