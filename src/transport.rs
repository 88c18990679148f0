//! # Transport
//!
//! Dicey only ever speaks over one of two local, bidirectional, ordered
//! byte streams: a Unix domain socket, or on Windows a named pipe. Since
//! the wire codec already does the only hard part — framing — in
//! [`crate::wire::packet::load`], this module just needs "accept a
//! byte-stream connection" and "read some bytes into a buffer / write some
//! bytes out", which is the same two operations on both platforms. That is
//! why this is a pair of concrete structs behind `#[cfg(unix)]`/
//! `#[cfg(windows)]` rather than a trait object: there is nothing left to
//! abstract once framing is factored out, and avoiding connection-type
//! punning is about the *connection state machine*, not the transport's
//! read/write shape.

use crate::chunk::ChunkBuffer;
use crate::error::{DiceyError, DiceyResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// How many bytes to ask the transport for per read. Matches
/// `ChunkBuffer`'s own initial capacity so a connection's first read fills
/// its buffer without an immediate regrow.
const READ_CHUNK: usize = 1024;

/// Read and write halves of a split [`Connection`], usable from a client
/// or server event loop that needs to await inbound bytes and outbound
/// sends concurrently in the same `tokio::select!` (spec §4.8/§4.9's
/// single-task-per-connection event loops).
#[cfg(unix)]
pub type ReadHalf = tokio::io::ReadHalf<tokio::net::UnixStream>;
#[cfg(unix)]
pub type WriteHalf = tokio::io::WriteHalf<tokio::net::UnixStream>;
#[cfg(windows)]
pub type ReadHalf = tokio::io::ReadHalf<imp::Stream>;
#[cfg(windows)]
pub type WriteHalf = tokio::io::WriteHalf<imp::Stream>;

pub(crate) async fn read_into<S: AsyncRead + Unpin>(stream: &mut S, buf: &mut ChunkBuffer) -> DiceyResult<usize> {
    let tail = buf.reserve(READ_CHUNK);
    let n = stream
        .read(tail)
        .await
        .map_err(|e| DiceyError::Transport(e.to_string()))?;
    buf.advance_filled(n);
    Ok(n)
}

pub(crate) async fn write_out<S: AsyncWrite + Unpin>(stream: &mut S, bytes: &[u8]) -> DiceyResult<()> {
    stream
        .write_all(bytes)
        .await
        .map_err(|e| DiceyError::Transport(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| DiceyError::Transport(e.to_string()))?;
    Ok(())
}

/// Build the platform-appropriate default address for a named Dicey
/// server (spec §6.1): a path under `/tmp` on Unix, a `\\.\pipe\` name on
/// Windows.
pub fn default_address(name: &str) -> String {
    #[cfg(unix)]
    {
        format!("/tmp/dicey-{}.sock", name)
    }
    #[cfg(windows)]
    {
        format!(r"\\.\pipe\dicey-{}", name)
    }
}

#[cfg(unix)]
mod imp {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tokio::net::{UnixListener, UnixStream};
    use tracing::warn;

    pub struct Listener {
        inner: UnixListener,
        path: String,
    }

    impl Listener {
        pub async fn bind(path: &str) -> DiceyResult<Self> {
            let _ = std::fs::remove_file(path);
            let inner = UnixListener::bind(path).map_err(|e| DiceyError::Transport(e.to_string()))?;
            // Local IPC peers may run as a different user (e.g. a plugin
            // subprocess); relax permissions so they can connect.
            let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666));
            Ok(Self {
                inner,
                path: path.to_string(),
            })
        }

        pub async fn accept(&self) -> DiceyResult<Connection> {
            let (stream, _addr) = self
                .inner
                .accept()
                .await
                .map_err(|e| DiceyError::Transport(e.to_string()))?;
            Ok(Connection { stream })
        }
    }

    impl Drop for Listener {
        fn drop(&mut self) {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove socket file {}: {}", self.path, e);
                }
            }
        }
    }

    pub struct Connection {
        stream: UnixStream,
    }

    impl Connection {
        pub async fn connect(path: &str) -> DiceyResult<Self> {
            let stream = UnixStream::connect(path)
                .await
                .map_err(|e| DiceyError::Transport(e.to_string()))?;
            Ok(Self { stream })
        }

        pub async fn read_into(&mut self, buf: &mut ChunkBuffer) -> DiceyResult<usize> {
            read_into(&mut self.stream, buf).await
        }

        pub async fn write_all(&mut self, bytes: &[u8]) -> DiceyResult<()> {
            write_out(&mut self.stream, bytes).await
        }

        pub fn split(self) -> (super::ReadHalf, super::WriteHalf) {
            tokio::io::split(self.stream)
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use tokio::net::windows::named_pipe::{ClientOptions, NamedPipeServer, ServerOptions};

    pub struct Listener {
        path: String,
    }

    impl Listener {
        pub async fn bind(path: &str) -> DiceyResult<Self> {
            // Reserve the pipe name as the first instance; dropped
            // immediately, `accept` creates the instance each caller
            // actually connects to.
            ServerOptions::new()
                .first_pipe_instance(true)
                .create(path)
                .map_err(|e| DiceyError::Transport(e.to_string()))?;
            Ok(Self {
                path: path.to_string(),
            })
        }

        pub async fn accept(&self) -> DiceyResult<Connection> {
            // Named pipes only support one instance per `NamedPipeServer`,
            // so each accepted connection takes ownership of the current
            // instance and a fresh one is created for the next caller.
            let server = ServerOptions::new()
                .create(&self.path)
                .map_err(|e| DiceyError::Transport(e.to_string()))?;
            server
                .connect()
                .await
                .map_err(|e| DiceyError::Transport(e.to_string()))?;
            Ok(Connection {
                stream: Stream::Server(server),
            })
        }
    }

    /// Server-accepted and client-dialed pipe handles have distinct
    /// `tokio` types; `Connection` just picks whichever side it is.
    pub(crate) enum Stream {
        Server(NamedPipeServer),
        Client(tokio::net::windows::named_pipe::NamedPipeClient),
    }

    impl AsyncRead for Stream {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match self.get_mut() {
                Stream::Server(s) => std::pin::Pin::new(s).poll_read(cx, buf),
                Stream::Client(s) => std::pin::Pin::new(s).poll_read(cx, buf),
            }
        }
    }

    impl AsyncWrite for Stream {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            match self.get_mut() {
                Stream::Server(s) => std::pin::Pin::new(s).poll_write(cx, buf),
                Stream::Client(s) => std::pin::Pin::new(s).poll_write(cx, buf),
            }
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match self.get_mut() {
                Stream::Server(s) => std::pin::Pin::new(s).poll_flush(cx),
                Stream::Client(s) => std::pin::Pin::new(s).poll_flush(cx),
            }
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            match self.get_mut() {
                Stream::Server(s) => std::pin::Pin::new(s).poll_shutdown(cx),
                Stream::Client(s) => std::pin::Pin::new(s).poll_shutdown(cx),
            }
        }
    }

    pub struct Connection {
        stream: Stream,
    }

    impl Connection {
        pub async fn connect(path: &str) -> DiceyResult<Self> {
            let stream = ClientOptions::new()
                .open(path)
                .map_err(|e| DiceyError::Transport(e.to_string()))?;
            Ok(Self {
                stream: Stream::Client(stream),
            })
        }

        pub async fn read_into(&mut self, buf: &mut ChunkBuffer) -> DiceyResult<usize> {
            read_into(&mut self.stream, buf).await
        }

        pub async fn write_all(&mut self, bytes: &[u8]) -> DiceyResult<()> {
            write_out(&mut self.stream, bytes).await
        }

        pub fn split(self) -> (super::ReadHalf, super::WriteHalf) {
            tokio::io::split(self.stream)
        }
    }
}

pub use imp::{Connection, Listener};

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use crate::wire::{load, LoadOutcome};

    #[tokio::test]
    async fn accepted_connection_round_trips_bytes() {
        let path = format!("/tmp/dicey-transport-test-{}.sock", std::process::id());
        let listener = Listener::bind(&path).await.unwrap();

        let server_path = path.clone();
        let server = tokio::spawn(async move {
            let mut conn = listener.accept().await.unwrap();
            let mut buf = ChunkBuffer::new();
            loop {
                conn.read_into(&mut buf).await.unwrap();
                if let LoadOutcome::Loaded { consumed, .. } = load(&crate::wire::view::View::new(buf.filled())).unwrap() {
                    buf.drain(consumed);
                    break;
                }
            }
            let _ = server_path;
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let mut client = Connection::connect(&path).await.unwrap();
        let hello = crate::wire::packet::hello(0, crate::wire::PROTOCOL_VERSION);
        client.write_all(&hello.encode()).await.unwrap();

        server.await.unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
