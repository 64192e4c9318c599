//! TCP transport.
//!
//! A connected stream is split into a read half, owned by the receiver task,
//! and a [`FrameWriter`], which the session keeps behind its send lock. Any
//! `AsyncRead + AsyncWrite` stream can be split the same way, which is how
//! tests drive a session over an in-memory pipe.

use crate::error::{ProtocolError, Result};
use crate::utils::timeout::{with_timeout_error, with_timeout_or};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens a TCP connection, giving up after `timeout`.
///
/// # Errors
/// - `ProtocolError::ConnectTimeout` if the deadline passes
/// - `ProtocolError::Io` if the connection is refused or the host cannot be resolved
#[instrument(skip(timeout))]
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let stream = with_timeout_or(
        async { Ok(TcpStream::connect((host, port)).await?) },
        timeout,
        ProtocolError::ConnectTimeout,
    )
    .await?;

    stream.set_nodelay(true)?;
    info!(peer = ?stream.peer_addr().ok(), "Connected");
    Ok(stream)
}

/// Splits a stream into its read half and a frame writer.
pub fn split<S>(stream: S, send_timeout: Duration) -> (BoxedReader, FrameWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    (
        Box::new(reader),
        FrameWriter {
            inner: Box::new(writer),
            send_timeout,
        },
    )
}

/// Write side of a connection. Every call writes a whole buffer or fails.
pub struct FrameWriter {
    inner: BoxedWriter,
    send_timeout: Duration,
}

impl FrameWriter {
    /// Writes all of `frame`, bounded by the send timeout.
    pub async fn send(&mut self, frame: &[u8]) -> Result<()> {
        let inner = &mut self.inner;
        with_timeout_error(
            async {
                inner.write_all(frame).await?;
                inner.flush().await?;
                Ok(())
            },
            self.send_timeout,
        )
        .await
    }

    /// Shuts down the write direction. The read direction closes when the
    /// receiver drops its half.
    pub async fn close(&mut self) -> Result<()> {
        debug!("Shutting down write half");
        self.inner.shutdown().await?;
        Ok(())
    }
}
