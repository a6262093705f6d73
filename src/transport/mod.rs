//! Transport module - the byte-buffer exchange both sides are built on.
//!
//! The protocol only needs two primitives:
//! - [`CommandSerializer`]: hand out writable space, flush it to the peer
//! - [`CommandHandler`]: consume received bytes, return what is left over
//!
//! Implementations:
//! - [`memory_pipe`]: in-process channel, used by tests and embedders
//! - [`StreamSerializer`]: feeds the pipe writer task (Unix socket / Named Pipe)

mod memory;
mod pipe;

use bytes::Bytes;

use crate::error::Result;
use crate::writer::WriterHandle;

pub use memory::{memory_pipe, MemoryReceiver, MemorySerializer};
pub use pipe::{connect_pipe, generate_pipe_path, PipeListener, PipeStream};

/// Outgoing half of a transport.
pub trait CommandSerializer: Send {
    /// Largest single allocation `get_cmd_space` can satisfy.
    fn max_allocation_size(&self) -> usize;

    /// Bytes `get_cmd_space` can still hand out before a flush.
    fn remaining_space(&self) -> usize;

    /// Writable space of exactly `size` bytes, or `None` if the current
    /// buffer is full. `None` is a request to flush and retry.
    fn get_cmd_space(&mut self, size: usize) -> Option<&mut [u8]>;

    /// Hand everything written so far to the peer.
    fn flush(&mut self) -> Result<()>;
}

/// Incoming half of a transport.
pub trait CommandHandler {
    /// Consume as many complete commands as `commands` holds and return the
    /// unconsumed tail (a partial record), or a fatal error.
    fn handle_commands<'a>(&mut self, commands: &'a [u8]) -> Result<&'a [u8]>;
}

/// Serializer installed after disconnect; nothing reaches the peer.
#[derive(Debug, Default)]
pub struct NoopSerializer;

impl CommandSerializer for NoopSerializer {
    fn max_allocation_size(&self) -> usize {
        0
    }

    fn remaining_space(&self) -> usize {
        0
    }

    fn get_cmd_space(&mut self, _size: usize) -> Option<&mut [u8]> {
        None
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Fixed-capacity staging buffer shared by the concrete serializers.
pub(crate) struct CommandBuffer {
    buf: Vec<u8>,
    used: usize,
}

impl CommandBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            used: 0,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.used
    }

    pub(crate) fn get_space(&mut self, size: usize) -> Option<&mut [u8]> {
        if size > self.remaining() {
            return None;
        }
        let start = self.used;
        self.used += size;
        Some(&mut self.buf[start..start + size])
    }

    /// Take the written bytes, leaving the buffer empty.
    pub(crate) fn take(&mut self) -> Option<Bytes> {
        if self.used == 0 {
            return None;
        }
        let out = Bytes::copy_from_slice(&self.buf[..self.used]);
        self.used = 0;
        Some(out)
    }
}

/// Serializer that flushes into the pipe writer task.
pub struct StreamSerializer {
    buffer: CommandBuffer,
    writer: WriterHandle,
}

impl StreamSerializer {
    pub fn new(writer: WriterHandle, max_allocation_size: usize) -> Self {
        Self {
            buffer: CommandBuffer::new(max_allocation_size),
            writer,
        }
    }
}

impl CommandSerializer for StreamSerializer {
    fn max_allocation_size(&self) -> usize {
        self.buffer.capacity()
    }

    fn remaining_space(&self) -> usize {
        self.buffer.remaining()
    }

    fn get_cmd_space(&mut self, size: usize) -> Option<&mut [u8]> {
        self.buffer.get_space(size)
    }

    fn flush(&mut self) -> Result<()> {
        match self.buffer.take() {
            Some(bytes) => {
                if self.writer.is_backpressure_active() {
                    tracing::warn!(pending = self.writer.pending_count(), "writer backlog full");
                }
                self.writer.try_send(bytes)
            }
            None => Ok(()),
        }
    }
}
