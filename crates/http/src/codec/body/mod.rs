//! Outgoing body framing.
//!
//! Request bodies are read by length (see [`crate::request`]), so only the
//! chunked encoder for streamed responses lives here.

mod chunked_encoder;

pub use chunked_encoder::ChunkedEncoder;

use bytes::{Buf, Bytes};

/// One step of a chunked body: some data, or the end of the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyChunk<D: Buf = Bytes> {
    Data(D),
    Last,
}
