//! Tunables shared by the connection, the parser and the dispatch layer.
//!
//! `Settings` deserializes from any serde format. Missing keys fall back to their
//! defaults and `read_timeout` is given in (fractional) seconds, `null` meaning no
//! timeout at all.

use crate::codec::{MAX_HEADER_BYTES, MAX_HEADER_FIELDS};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

pub const DEFAULT_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Size of the fixed per-connection read buffer
    pub read_buffer_size: usize,
    /// Chunk size used when streaming files or readers to the peer
    pub write_buffer_size: usize,
    pub max_header_bytes: usize,
    pub max_header_fields: usize,
    /// Deadline of every single read, `None` waits forever
    #[serde(deserialize_with = "seconds")]
    pub read_timeout: Option<Duration>,
    /// Send handler error messages as the body of 500 responses
    pub expose_exception: bool,
    /// Trust `X-Forwarded-Host` and `X-Forwarded-For`
    pub trust_proxy: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            read_buffer_size: DEFAULT_BUFFER_SIZE,
            write_buffer_size: DEFAULT_BUFFER_SIZE,
            max_header_bytes: MAX_HEADER_BYTES,
            max_header_fields: MAX_HEADER_FIELDS,
            read_timeout: Some(DEFAULT_READ_TIMEOUT),
            expose_exception: false,
            trust_proxy: false,
        }
    }
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
    let secs = Option::<f64>::deserialize(deserializer)?;
    secs.map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)).transpose()
}
