//! Protocol module - records, commands and chunked framing.
//!
//! - [`wire_format`]: 12-byte record header, bounds-checked body reader
//! - [`command`]: the closed command tables and their encodings
//! - [`chunked`]: splitting and reassembling oversized records

mod chunked;
mod command;
mod wire_format;

pub use chunked::{ChunkedCommandHandler, ChunkedSerializer};
pub use command::{Command, CommandKind, ReturnCommand, ReturnCommandKind};
pub use wire_format::{
    RecordHeader, WireReader, WireWriter, CHUNK_KIND, CHUNK_OVERHEAD, CHUNK_PREFIX_SIZE, DEFAULT_MAX_ALLOCATION_SIZE,
    DEFAULT_MAX_COMMAND_SIZE, MIN_ALLOCATION_SIZE, RECORD_HEADER_SIZE,
};
