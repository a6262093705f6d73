//! Wire format encoding and decoding.
//!
//! Every record on the wire starts with a 12-byte header:
//! ```text
//! ┌──────────────┬──────────────┬──────────────┐
//! │ Command kind │ Target id    │ Body length  │
//! │ 4 bytes      │ 4 bytes      │ 4 bytes      │
//! │ uint32 BE    │ uint32 BE    │ uint32 BE    │
//! └──────────────┴──────────────┴──────────────┘
//! ```
//!
//! followed by `body_length` bytes of method-specific fields. Records
//! larger than the transport allows are carried inside chunk records
//! (`kind == CHUNK_KIND`, `target == sequence`) whose body is
//! `[u32 total][u32 offset][fragment]`.
//!
//! All multi-byte integers are Big Endian.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, WireError};
use crate::object::{ObjectHandle, ObjectId};

/// Record header size in bytes (fixed, exactly 12).
pub const RECORD_HEADER_SIZE: usize = 12;

/// Reserved command kind marking a chunk record.
pub const CHUNK_KIND: u32 = 0xFFFF_FFFF;

/// Size of the `[total][offset]` prefix inside a chunk body.
pub const CHUNK_PREFIX_SIZE: usize = 8;

/// Bytes a chunk record adds around its fragment.
pub const CHUNK_OVERHEAD: usize = RECORD_HEADER_SIZE + CHUNK_PREFIX_SIZE;

/// Default transport allocation size (1 MB).
pub const DEFAULT_MAX_ALLOCATION_SIZE: usize = 1 << 20;

/// Default maximum size of one reassembled command (256 MB).
pub const DEFAULT_MAX_COMMAND_SIZE: u32 = 256 * 1024 * 1024;

/// Smallest allocation size that still leaves room for a fragment byte.
pub const MIN_ALLOCATION_SIZE: usize = CHUNK_OVERHEAD + 1;

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Command kind (or [`CHUNK_KIND`]).
    pub kind: u32,
    /// Target object id (or chunk sequence number).
    pub target: u32,
    /// Body length in bytes.
    pub body_len: u32,
}

impl RecordHeader {
    pub fn new(kind: u32, target: u32, body_len: u32) -> Self {
        Self {
            kind,
            target,
            body_len,
        }
    }

    /// Encode header to bytes (Big Endian).
    pub fn encode(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut buf = [0u8; RECORD_HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `RECORD_HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.kind.to_be_bytes());
        buf[4..8].copy_from_slice(&self.target.to_be_bytes());
        buf[8..12].copy_from_slice(&self.body_len.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < RECORD_HEADER_SIZE {
            return None;
        }
        Some(Self {
            kind: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            target: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            body_len: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }

    /// Reject headers whose declared body exceeds `max_command_size`.
    pub fn validate(&self, max_command_size: u32) -> Result<()> {
        if self.body_len > max_command_size {
            return Err(WireError::decode(format!(
                "Body size {} exceeds maximum {}",
                self.body_len, max_command_size
            )));
        }
        Ok(())
    }

    /// Total record length including the header.
    #[inline]
    pub fn record_len(&self) -> usize {
        RECORD_HEADER_SIZE + self.body_len as usize
    }

    #[inline]
    pub fn is_chunk(&self) -> bool {
        self.kind == CHUNK_KIND
    }
}

/// Builds one record: header placeholder, then body fields.
///
/// The body length is patched in by [`WireWriter::finish`].
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    pub fn new(kind: u32, target: u32) -> Self {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_slice(&RecordHeader::new(kind, target, 0).encode());
        Self { buf }
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64(value);
        self
    }

    pub fn put_handle(&mut self, handle: ObjectHandle) -> &mut Self {
        self.buf.put_u32(handle.id);
        self.buf.put_u32(handle.generation);
        self
    }

    /// Length-prefixed byte payload.
    pub fn put_bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_u32(data.len() as u32);
        self.buf.put_slice(data);
        self
    }

    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_bytes(value.as_bytes())
    }

    /// Count-prefixed array of ids.
    pub fn put_ids(&mut self, ids: &[ObjectId]) -> &mut Self {
        self.buf.put_u32(ids.len() as u32);
        for id in ids {
            self.buf.put_u32(*id);
        }
        self
    }

    /// Count-prefixed array of signed dimensions.
    pub fn put_i32s(&mut self, values: &[i32]) -> &mut Self {
        self.buf.put_u32(values.len() as u32);
        for value in values {
            self.buf.put_i32(*value);
        }
        self
    }

    /// Patch the body length and return the finished record.
    pub fn finish(mut self) -> Result<Bytes> {
        let body_len = self.buf.len() - RECORD_HEADER_SIZE;
        let body_len = u32::try_from(body_len)
            .map_err(|_| WireError::validation(format!("record body of {} bytes", body_len)))?;
        self.buf[8..12].copy_from_slice(&body_len.to_be_bytes());
        Ok(self.buf.freeze())
    }
}

/// Bounds-checked reader over one record body.
///
/// Every length read from the wire is checked against the bytes that are
/// actually left before anything is sliced or allocated.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(WireError::decode(format!(
                "need {} bytes at offset {}, only {} available",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn read_handle(&mut self) -> Result<ObjectHandle> {
        let id = self.read_u32()?;
        let generation = self.read_u32()?;
        Ok(ObjectHandle::new(id, generation))
    }

    /// Read a length-prefixed byte payload.
    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    pub fn read_str(&mut self) -> Result<&'a str> {
        let raw = self.read_bytes()?;
        std::str::from_utf8(raw).map_err(|e| WireError::decode(format!("invalid UTF-8: {}", e)))
    }

    /// Read a count-prefixed array of 4-byte elements.
    fn read_array<T>(&mut self, read: impl Fn(&[u8]) -> T) -> Result<Vec<T>> {
        let count = self.read_u32()? as usize;
        let byte_len = count
            .checked_mul(4)
            .ok_or_else(|| WireError::decode(format!("array count {} overflows", count)))?;
        let raw = self.take(byte_len)?;
        Ok(raw.chunks_exact(4).map(read).collect())
    }

    pub fn read_ids(&mut self) -> Result<Vec<ObjectId>> {
        self.read_array(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32s(&mut self) -> Result<Vec<i32>> {
        self.read_array(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Fail if any body bytes were left unread.
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(WireError::decode(format!(
                "{} trailing bytes after command body",
                self.remaining()
            )));
        }
        Ok(())
    }
}
