//! Trait abstraction for line transports to enable testing

use async_trait::async_trait;
use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Duration, Instant};
use tracing::warn;

/// Longest line accepted before the buffer is considered garbage and dropped
pub const MAX_LINE_LEN: usize = 256;

/// Trait for line-oriented transport I/O
///
/// Implemented by the real serial port and by the simulated peer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send {
    /// Write all data to the transport
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush the output buffer
    async fn flush(&mut self) -> io::Result<()>;

    /// Read one line, waiting at most `timeout`
    ///
    /// Returns `Ok(None)` when no complete line arrived in time. The returned
    /// line still carries its terminator.
    async fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>>;

    /// Release the transport
    async fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        (**self).flush().await
    }

    async fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        (**self).read_line(timeout).await
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        (**self).shutdown().await
    }
}

/// Line framing over any async byte stream
///
/// Bytes are accumulated until a `\n` is seen. A partial line survives across
/// timed-out reads.
pub struct LineTransport<S> {
    stream: S,
    buffer: BytesMut,
}

impl<S> LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(MAX_LINE_LEN),
        }
    }

    /// Pop one complete line off the buffer
    fn take_line(&mut self) -> Option<String> {
        let end = self.buffer.iter().position(|&b| b == b'\n')?;
        let line = self.buffer.split_to(end + 1);
        Some(String::from_utf8_lossy(&line).into_owned())
    }
}

#[async_trait]
impl<S> Transport for LineTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().await
    }

    async fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(line) = self.take_line() {
                return Ok(Some(line));
            }

            if self.buffer.len() > MAX_LINE_LEN {
                warn!("Dropping {} bytes without line terminator", self.buffer.len());
                self.buffer.clear();
            }

            match timeout_at(deadline, self.stream.read_buf(&mut self.buffer)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "transport closed by peer",
                    ))
                }
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}
