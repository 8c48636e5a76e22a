//! Byte level codecs of the engine.
//!
//! - Request side: [`RequestParser`], the incremental header state machine
//! - Response side: [`HeaderEncoder`] for the status line and header fields, and
//!   [`ChunkedEncoder`] for chunked transfer-encoding of streamed bodies
//!
//! Nothing in here performs I/O. The connection feeds raw bytes into the parser and
//! writes out whatever the encoders put into its write buffer.

mod body;
mod header;

pub use body::{BodyChunk, ChunkedEncoder};
pub use header::HeaderEncoder;
pub use header::{MAX_HEADER_BYTES, MAX_HEADER_FIELDS, ParseProgress, ParseState, RequestParser};
