//! Platform-specific pipe/socket endpoints for the wire host.
//!
//! - Unix: Unix Domain Socket
//! - Windows: Named Pipe
//!
//! The host binds a listener, announces the path over the control plane
//! and serves one connection; the client side connects with
//! [`connect_pipe`].

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Generate a unique pipe path for this process.
///
/// Format:
/// - Unix: `/tmp/webnn-wire-{pid}-{random}.sock`
/// - Windows: `\\.\pipe\webnn-wire-{pid}-{random}`
pub fn generate_pipe_path() -> String {
    let pid = std::process::id();
    let rand = rand_u64();

    #[cfg(unix)]
    {
        format!("/tmp/webnn-wire-{}-{:x}.sock", pid, rand)
    }

    #[cfg(windows)]
    {
        format!(r"\\.\pipe\webnn-wire-{}-{:x}", pid, rand)
    }
}

/// Time-seeded u64, mixed with a process-wide counter so paths generated
/// within one clock tick still differ.
fn rand_u64() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id() as u64;
    (nanos ^ count.rotate_left(32)).wrapping_mul(0x517cc1b727220a95) ^ pid
}

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::path::Path;
    use tokio::net::{UnixListener, UnixStream};

    pub struct PipeListener {
        listener: UnixListener,
        path: String,
    }

    pub struct PipeStream {
        stream: UnixStream,
    }

    impl PipeListener {
        /// Bind to a Unix socket path, replacing a stale socket file.
        pub async fn bind(path: &str) -> Result<Self> {
            if Path::new(path).exists() {
                std::fs::remove_file(path)?;
            }
            let listener = UnixListener::bind(path)?;
            tracing::debug!(path, "wire listener bound");
            Ok(Self {
                listener,
                path: path.to_string(),
            })
        }

        pub async fn accept(&self) -> Result<PipeStream> {
            let (stream, _addr) = self.listener.accept().await?;
            Ok(PipeStream { stream })
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl Drop for PipeListener {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    impl PipeStream {
        pub async fn connect(path: &str) -> Result<Self> {
            let stream = UnixStream::connect(path).await?;
            Ok(Self { stream })
        }

        /// Split into owned read and write halves.
        pub fn into_split(
            self,
        ) -> (
            impl AsyncRead + Unpin + Send + 'static,
            impl AsyncWrite + Unpin + Send + 'static,
        ) {
            self.stream.into_split()
        }
    }
}

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use std::time::Duration;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions};

    const ERROR_PIPE_BUSY: i32 = 231;

    pub struct PipeListener {
        path: String,
    }

    enum Pipe {
        Server(NamedPipeServer),
        Client(NamedPipeClient),
    }

    pub struct PipeStream {
        pipe: Pipe,
    }

    impl PipeListener {
        pub async fn bind(path: &str) -> Result<Self> {
            let _ = ServerOptions::new().first_pipe_instance(true).create(path)?;
            tracing::debug!(path, "wire listener bound");
            Ok(Self {
                path: path.to_string(),
            })
        }

        pub async fn accept(&self) -> Result<PipeStream> {
            let server = ServerOptions::new()
                .first_pipe_instance(false)
                .create(&self.path)?;
            server.connect().await?;
            Ok(PipeStream {
                pipe: Pipe::Server(server),
            })
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl PipeStream {
        pub async fn connect(path: &str) -> Result<Self> {
            loop {
                match ClientOptions::new().open(path) {
                    Ok(client) => {
                        return Ok(Self {
                            pipe: Pipe::Client(client),
                        })
                    }
                    Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY) => {
                        tokio::time::sleep(Duration::from_millis(20)).await;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        pub fn into_split(
            self,
        ) -> (
            impl AsyncRead + Unpin + Send + 'static,
            impl AsyncWrite + Unpin + Send + 'static,
        ) {
            tokio::io::split(self)
        }
    }

    impl AsyncRead for PipeStream {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match &mut self.pipe {
                Pipe::Server(p) => std::pin::Pin::new(p).poll_read(cx, buf),
                Pipe::Client(p) => std::pin::Pin::new(p).poll_read(cx, buf),
            }
        }
    }

    impl AsyncWrite for PipeStream {
        fn poll_write(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            match &mut self.pipe {
                Pipe::Server(p) => std::pin::Pin::new(p).poll_write(cx, buf),
                Pipe::Client(p) => std::pin::Pin::new(p).poll_write(cx, buf),
            }
        }

        fn poll_flush(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match &mut self.pipe {
                Pipe::Server(p) => std::pin::Pin::new(p).poll_flush(cx),
                Pipe::Client(p) => std::pin::Pin::new(p).poll_flush(cx),
            }
        }

        fn poll_shutdown(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match &mut self.pipe {
                Pipe::Server(p) => std::pin::Pin::new(p).poll_shutdown(cx),
                Pipe::Client(p) => std::pin::Pin::new(p).poll_shutdown(cx),
            }
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{PipeListener, PipeStream};

#[cfg(windows)]
pub use windows_impl::{PipeListener, PipeStream};

/// Connect to a listening wire host.
pub async fn connect_pipe(path: &str) -> Result<PipeStream> {
    PipeStream::connect(path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_pipe_path_format() {
        let path = generate_pipe_path();

        #[cfg(unix)]
        {
            assert!(path.starts_with("/tmp/webnn-wire-"));
            assert!(path.ends_with(".sock"));
        }

        #[cfg(windows)]
        {
            assert!(path.starts_with(r"\\.\pipe\webnn-wire-"));
        }

        assert!(path.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_generate_pipe_path_uniqueness() {
        let paths: std::collections::HashSet<String> =
            (0..32).map(|_| generate_pipe_path()).collect();
        assert_eq!(paths.len(), 32);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_accept_connect() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let path = generate_pipe_path();
        let listener = PipeListener::bind(&path).await.unwrap();

        let client = tokio::spawn({
            let path = path.clone();
            async move {
                let stream = connect_pipe(&path).await.unwrap();
                let (_read, mut write) = stream.into_split();
                write.write_all(b"ping").await.unwrap();
            }
        });

        let stream = listener.accept().await.unwrap();
        let (mut read, _write) = stream.into_split();
        let mut buf = [0u8; 4];
        read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        client.await.unwrap();

        drop(listener);
        assert!(!std::path::Path::new(&path).exists());
    }
}
