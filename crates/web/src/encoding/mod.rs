//! Compressed chunked bodies.
//!
//! [`EncodingProducer`] compresses pushed bytes on the fly and hands the compressed
//! output to the chunked response writer through the producer contract.

mod encoder;

pub use encoder::{ContentEncoding, EncodingProducer};

use bytes::{Bytes, BytesMut};
use std::io;

// inspired by from actix-http
pub(crate) struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
