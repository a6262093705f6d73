//! In-process transport.
//!
//! Flushed buffers travel over an unbounded tokio channel. The receiving
//! end keeps bytes a handler did not consume and prepends them to the next
//! buffer. Dropping the serializer closes the transport.

use bytes::{Buf, Bytes, BytesMut};
use tokio::sync::mpsc;

use super::{CommandBuffer, CommandHandler, CommandSerializer};
use crate::error::{Result, WireError};

/// Create a connected serializer/receiver pair.
pub fn memory_pipe(max_allocation_size: usize) -> (MemorySerializer, MemoryReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemorySerializer {
            buffer: CommandBuffer::new(max_allocation_size),
            tx: Some(tx),
        },
        MemoryReceiver {
            rx,
            pending: BytesMut::new(),
        },
    )
}

/// Sending end of [`memory_pipe`].
pub struct MemorySerializer {
    buffer: CommandBuffer,
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

impl MemorySerializer {
    /// Close the transport. Buffered but unflushed bytes are discarded.
    pub fn close(&mut self) {
        self.tx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl CommandSerializer for MemorySerializer {
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
        let Some(bytes) = self.buffer.take() else {
            return Ok(());
        };
        let tx = self.tx.as_ref().ok_or(WireError::ConnectionClosed)?;
        tx.send(bytes).map_err(|_| WireError::ConnectionClosed)
    }
}

/// Receiving end of [`memory_pipe`].
pub struct MemoryReceiver {
    rx: mpsc::UnboundedReceiver<Bytes>,
    pending: BytesMut,
}

impl MemoryReceiver {
    /// Next flushed buffer, if one is queued.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Deliver every queued buffer to `handler`.
    ///
    /// Returns `Ok(false)` once the sending side is gone and nothing is
    /// left to deliver.
    pub fn deliver<H: CommandHandler + ?Sized>(&mut self, handler: &mut H) -> Result<bool> {
        loop {
            match self.rx.try_recv() {
                Ok(bytes) => self.handle(handler, &bytes)?,
                Err(mpsc::error::TryRecvError::Empty) => return Ok(true),
                Err(mpsc::error::TryRecvError::Disconnected) => return Ok(false),
            }
        }
    }

    /// Wait for the next buffer and deliver it.
    ///
    /// Returns `Ok(false)` when the transport has been closed.
    pub async fn deliver_next<H: CommandHandler + ?Sized>(&mut self, handler: &mut H) -> Result<bool> {
        match self.rx.recv().await {
            Some(bytes) => {
                self.handle(handler, &bytes)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Bytes held back as an incomplete record.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn handle<H: CommandHandler + ?Sized>(&mut self, handler: &mut H, bytes: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(bytes);
        let total = self.pending.len();
        let remaining = handler.handle_commands(&self.pending)?.len();
        self.pending.advance(total - remaining);
        Ok(())
    }
}
