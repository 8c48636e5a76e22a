use crate::codec::body::BodyChunk;
use crate::protocol::SendError;
use bytes::{Buf, BytesMut};
use std::io::Write;

use tokio_util::codec::Encoder;

/// Frames body chunks with chunked transfer-encoding.
///
/// Every non-empty chunk becomes `<hex-length>\r\n<bytes>\r\n`, `Last` becomes the
/// terminal `0\r\n\r\n`. Empty chunks are dropped since they would read as the
/// terminal chunk, and nothing is written after `Last`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkedEncoder {
    finished: bool,
    send_size: usize,
}

impl ChunkedEncoder {
    pub fn new() -> Self {
        Self { finished: false, send_size: 0 }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Payload bytes framed so far, excluding framing overhead
    pub fn send_size(&self) -> usize {
        self.send_size
    }
}

impl<D: Buf> Encoder<BodyChunk<D>> for ChunkedEncoder {
    type Error = SendError;

    fn encode(&mut self, item: BodyChunk<D>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if self.finished {
            return Ok(());
        }

        match item {
            BodyChunk::Data(bytes) => {
                let len = bytes.remaining();
                if len == 0 {
                    return Ok(());
                }
                write!(helper::Writer(dst), "{len:X}\r\n")?;
                dst.reserve(len + 2);
                dst.extend_from_slice(bytes.chunk());
                dst.extend_from_slice(b"\r\n");
                self.send_size += len;
                Ok(())
            }
            BodyChunk::Last => {
                self.finished = true;
                dst.extend_from_slice(b"0\r\n\r\n");
                Ok(())
            }
        }
    }
}

mod helper {
    use bytes::{BufMut, BytesMut};
    use std::io;

    pub struct Writer<'a>(pub &'a mut BytesMut);

    impl io::Write for Writer<'_> {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.put_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
