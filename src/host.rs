//! Pipe host: serves one client connection over a Unix socket / Named Pipe.
//!
//! The [`HostBuilder`] manages the lifecycle:
//! 1. Create pipe listener
//! 2. Send `$init` via stdout
//! 3. Accept parent connection
//! 4. Feed received bytes to a [`Server`] until the connection ends
//!
//! Outgoing return commands go through a [`StreamSerializer`] into the
//! writer task, so the read loop never waits on the pipe writer.
//!
//! # Example
//!
//! ```ignore
//! use webnn_wire::host::HostBuilder;
//! use webnn_wire::native::NativeProcs;
//!
//! #[tokio::main]
//! async fn main() -> webnn_wire::Result<()> {
//!     let procs = Arc::new(NativeProcs::null());
//!     let instance = procs.create_instance();
//!     HostBuilder::new(procs)
//!         .serve(|server| server.inject_instance(ObjectHandle::new(1, 0), instance))
//!         .await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::JoinHandle;

use crate::config::WireConfig;
use crate::control::{build_init_message, write_stdout_line, InitSchema};
use crate::error::{Result, WireError};
use crate::native::Procs;
use crate::server::{ConnectionState, Server};
use crate::transport::{generate_pipe_path, CommandHandler, PipeListener, StreamSerializer};
use crate::writer::{spawn_writer_task, WriterConfig};

/// Bytes requested from the pipe per read.
const READ_BUFFER_SIZE: usize = 64 * 1024;

pub struct HostBuilder {
    procs: Arc<dyn Procs>,
    config: WireConfig,
    writer_config: WriterConfig,
}

impl HostBuilder {
    pub fn new(procs: Arc<dyn Procs>) -> Self {
        Self {
            procs,
            config: WireConfig::default(),
            writer_config: WriterConfig::default(),
        }
    }

    pub fn config(mut self, config: WireConfig) -> Self {
        self.config = config;
        self
    }

    /// Maximum buffers queued on the writer task before flushes fail.
    pub fn max_pending_buffers(mut self, limit: usize) -> Self {
        self.writer_config.max_pending_buffers = limit;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Announce a pipe, accept one connection and serve it.
    ///
    /// `on_connect` runs before the first command is read; use it to
    /// inject the objects the client reserved.
    pub async fn serve<F>(self, on_connect: F) -> Result<ConnectionState>
    where
        F: FnOnce(&mut Server) -> Result<()>,
    {
        let pipe_path = generate_pipe_path();
        let listener = PipeListener::bind(&pipe_path).await?;

        let init_msg = build_init_message(&pipe_path, &InitSchema::wire(), &self.config)?;
        write_stdout_line(&init_msg)?;

        let stream = listener.accept().await?;
        tracing::debug!(pipe = %listener.path(), "client connected");
        let (reader, writer) = stream.into_split();

        let mut connection = Connection::new(reader, writer, self.procs, self.config, self.writer_config);
        on_connect(connection.server_mut())?;
        connection.run().await
    }
}

/// One served connection: a read half, the server and its writer task.
pub struct Connection<R> {
    reader: R,
    server: Server,
    writer_task: JoinHandle<Result<()>>,
}

impl<R: AsyncRead + Unpin> Connection<R> {
    pub fn new<W>(reader: R, writer: W, procs: Arc<dyn Procs>, config: WireConfig, writer_config: WriterConfig) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (handle, writer_task) = spawn_writer_task(writer, writer_config);
        let serializer = StreamSerializer::new(handle, config.max_allocation_size);
        Self {
            reader,
            server: Server::new(procs, Box::new(serializer), config),
            writer_task,
        }
    }

    pub fn server_mut(&mut self) -> &mut Server {
        &mut self.server
    }

    /// Serve until the peer disconnects or a fatal error occurs.
    ///
    /// The server is torn down and the writer task drained before this
    /// returns, so every queued return command has reached the pipe.
    pub async fn run(self) -> Result<ConnectionState> {
        let Connection {
            mut reader,
            mut server,
            writer_task,
        } = self;

        let result = read_loop(&mut reader, &mut server).await;
        if let Err(e) = &result {
            server.fail(e.to_string());
        }
        let state = server.state().clone();
        drop(server);

        let written = writer_task
            .await
            .map_err(|e| WireError::Transport(format!("writer task failed: {}", e)))?;
        result?;
        written?;
        Ok(state)
    }
}

/// Feed the pipe into `server`, and serialize completions that arrive from
/// outside the dispatch loop as soon as they are queued.
async fn read_loop<R: AsyncRead + Unpin>(reader: &mut R, server: &mut Server) -> Result<()> {
    let completion_ready = server.completion_ready();
    let mut pending = BytesMut::with_capacity(READ_BUFFER_SIZE);
    loop {
        pending.reserve(READ_BUFFER_SIZE);
        tokio::select! {
            read = reader.read_buf(&mut pending) => {
                if read? == 0 {
                    if !pending.is_empty() {
                        tracing::debug!(bytes = pending.len(), "connection closed inside a record");
                    }
                    server.disconnect();
                    return Ok(());
                }

                let total = pending.len();
                let remaining = server.handle_commands(&pending)?.len();
                pending.advance(total - remaining);
            }
            _ = completion_ready.notified() => {
                server.flush_completions()?;
                server.flush()?;
            }
        }

        if server.is_disconnected() {
            return Ok(());
        }
    }
}

impl std::fmt::Debug for HostBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBuilder")
            .field("procs", &self.procs.name())
            .field("config", &self.config)
            .field("writer_config", &self.writer_config)
            .finish()
    }
}
