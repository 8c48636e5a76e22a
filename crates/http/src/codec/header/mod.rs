//! HTTP header processing for both directions.
//!
//! - [`RequestParser`]: incremental request header parsing with size limits
//! - [`HeaderEncoder`]: response header serialization

mod header_encoder;
mod header_parser;

pub use header_encoder::HeaderEncoder;
pub use header_parser::{MAX_HEADER_BYTES, MAX_HEADER_FIELDS, ParseProgress, ParseState, RequestParser};
