//! Codecs for structured command arguments.
//!
//! Fixed-layout fields are written directly by
//! [`WireWriter`](crate::protocol::WireWriter); anything shaped like an
//! option dictionary goes through [`MsgPackCodec`].

mod msgpack;

pub use msgpack::MsgPackCodec;
