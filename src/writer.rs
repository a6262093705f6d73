//! Dedicated writer task for flushed command buffers.
//!
//! Serializers run synchronously inside the dispatch loop, so they hand
//! finished buffers to a writer task over an mpsc channel instead of
//! writing to the pipe themselves. The task batches whatever is queued
//! into one vectored write.
//!
//! ```text
//! StreamSerializer::flush ─► WriterHandle::try_send ─► Writer Task ─► Pipe
//! ```

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Result, WireError};

/// Default maximum buffers queued before `try_send` refuses more.
pub const DEFAULT_MAX_PENDING_BUFFERS: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum buffers to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum queued buffers before backpressure kicks in.
    pub max_pending_buffers: usize,
    /// Channel capacity for the buffer queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_buffers: DEFAULT_MAX_PENDING_BUFFERS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for queueing buffers on the writer task. Cheap to clone.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
    pending: Arc<AtomicUsize>,
    max_pending: usize,
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<Bytes>, pending: Arc<AtomicUsize>, max_pending: usize) -> Self {
        Self {
            tx,
            pending,
            max_pending,
        }
    }

    /// Queue a buffer without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity and
    /// `Err(ConnectionClosed)` once the writer task is gone.
    pub fn try_send(&self, buffer: Bytes) -> Result<()> {
        if self.pending.load(Ordering::Acquire) >= self.max_pending {
            return Err(WireError::BackpressureTimeout);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.try_send(buffer).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => WireError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => WireError::ConnectionClosed,
            }
        })
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending_count() >= self.max_pending
    }
}

/// Spawn the writer task and return a handle for queueing buffers.
///
/// The task finishes cleanly once every handle has been dropped.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));
    let handle = WriterHandle::new(tx, pending.clone(), config.max_pending_buffers);
    let task = tokio::spawn(writer_loop(rx, writer, pending));
    (handle, task)
}

async fn writer_loop<W>(mut rx: mpsc::Receiver<Bytes>, mut writer: W, pending: Arc<AtomicUsize>) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(buffer) => batch.push(buffer),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::error!("wire writer failed: {}", e);
            return Err(e);
        }
        pending.fetch_sub(batch_size, Ordering::Release);
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch with vectored I/O, continuing after partial writes.
async fn write_batch<W>(writer: &mut W, batch: &[Bytes]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(|b| b.len()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Slices for the bytes of `batch` after the first `skip_bytes`.
fn remaining_slices(batch: &[Bytes], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len());
    let mut start = 0;
    for buffer in batch {
        let end = start + buffer.len();
        if skip_bytes < end && !buffer.is_empty() {
            slices.push(IoSlice::new(&buffer[skip_bytes.saturating_sub(start)..]));
        }
        start = end;
    }
    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.max_pending_buffers, DEFAULT_MAX_PENDING_BUFFERS);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_remaining_slices() {
        let batch = vec![Bytes::from_static(b"hello"), Bytes::from_static(b"abc")];
        assert_eq!(remaining_slices(&batch, 0).len(), 2);

        let partial = remaining_slices(&batch, 3);
        assert_eq!(partial.len(), 2);
        assert_eq!(partial[0].len(), 2);

        let tail = remaining_slices(&batch, 6);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].len(), 2);
    }

    #[tokio::test]
    async fn test_try_send_reaches_pipe() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        for i in 0..10u32 {
            handle.try_send(Bytes::copy_from_slice(&i.to_be_bytes())).unwrap();
        }

        let mut buf = vec![0u8; 40];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf[36..40], &9u32.to_be_bytes());
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let (tx, _rx) = mpsc::channel::<Bytes>(10);
        let pending = Arc::new(AtomicUsize::new(100));
        let handle = WriterHandle::new(tx, pending, 100);

        assert!(handle.is_backpressure_active());
        let result = handle.try_send(Bytes::from_static(b"x"));
        assert!(matches!(result, Err(WireError::BackpressureTimeout)));
    }

    #[tokio::test]
    async fn test_try_send_after_task_exit() {
        let (tx, rx) = mpsc::channel::<Bytes>(10);
        drop(rx);
        let handle = WriterHandle::new(tx, Arc::new(AtomicUsize::new(0)), 100);

        let result = handle.try_send(Bytes::from_static(b"x"));
        assert!(matches!(result, Err(WireError::ConnectionClosed)));
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, mut server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());
        drop(handle);

        let result = tokio::time::timeout(Duration::from_secs(1), task).await.unwrap();
        assert!(result.unwrap().is_ok());

        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
