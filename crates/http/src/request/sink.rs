use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Destination of a request body read.
///
/// `write` reports how many bytes it accepted and the reader keeps calling it until
/// every byte of a read landed in the sink. A sink returning `Ok(0)` for a non-empty
/// slice fails the read with [`io::ErrorKind::WriteZero`].
#[async_trait]
pub trait ReadSink: Send {
    async fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    fn total_bytes_written(&self) -> u64;

    /// Called once after the last byte was written.
    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Collects the body in memory.
#[derive(Debug, Default)]
pub struct BufferSink {
    buffer: BytesMut,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { buffer: BytesMut::with_capacity(capacity) }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

#[async_trait]
impl ReadSink for BufferSink {
    async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(data);
        Ok(data.len())
    }

    fn total_bytes_written(&self) -> u64 {
        self.buffer.len() as u64
    }
}

/// Streams the body into any async writer, a file for instance.
#[derive(Debug)]
pub struct StreamSink<W> {
    writer: W,
    written: u64,
}

impl<W> StreamSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W> ReadSink for StreamSink<W>
where
    W: AsyncWrite + Send + Unpin,
{
    async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(data).await?;
        self.written += n as u64;
        Ok(n)
    }

    fn total_bytes_written(&self) -> u64 {
        self.written
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }
}
