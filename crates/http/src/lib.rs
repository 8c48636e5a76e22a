//! An embeddable asynchronous HTTP/1.1 server engine
//!
//! This crate provides the connection level half of a small web server: it accepts
//! nothing by itself, but turns any `AsyncRead + AsyncWrite` transport into a parsed
//! request and a response facade, serving exactly one request per connection.
//!
//! # Features
//!
//! - Incremental request header parsing with size and field-count limits
//! - Read deadlines and cancellation of pending I/O when a connection is stopped
//! - On-demand request body reading into pluggable sinks
//! - Responses with fixed length bodies, files, and chunked streams driven by a
//!   [`producer::Producer`]
//! - Cookies in both directions, query and path decoding
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use hearth_http::Settings;
//! use hearth_http::connection::ConnectionManager;
//! use tokio::net::TcpListener;
//! use tracing::{error, info, warn};
//!
//! #[tokio::main]
//! async fn main() {
//!     let settings = Arc::new(Settings::default());
//!     let manager = ConnectionManager::new();
//!
//!     let tcp_listener = match TcpListener::bind("127.0.0.1:8080").await {
//!         Ok(tcp_listener) => tcp_listener,
//!         Err(e) => {
//!             error!(cause = %e, "bind server error");
//!             return;
//!         }
//!     };
//!
//!     loop {
//!         let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
//!             Ok(stream_and_addr) => stream_and_addr,
//!             Err(e) => {
//!                 warn!(cause = %e, "failed to accept");
//!                 continue;
//!             }
//!         };
//!
//!         let mut connection = manager.create(tcp_stream, Some(remote_addr), Arc::clone(&settings));
//!         tokio::spawn(async move {
//!             let parser = match connection.read_header().await {
//!                 Ok(parser) => parser,
//!                 Err(e) => {
//!                     info!(cause = %e, "no request");
//!                     return;
//!                 }
//!             };
//!             let mut ctx = connection.bind(parser);
//!             let path = ctx.request().path().to_owned();
//!             if let Err(e) = ctx.response_mut().send(format!("Hello {path}!")).await {
//!                 warn!(cause = %e, "failed to respond");
//!             }
//!         });
//!     }
//! }
//! ```
//!
//! # Architecture
//!
//! - [`connection`]: transports, the read/write buffers, stopping and the registry
//! - [`codec`]: the header parser and the response side encoders
//! - [`protocol`]: header types, cookies and the error types
//! - [`request`]: the request facade and body sinks
//! - [`response`]: the response facade, conclusion tracking and chunked streaming
//! - [`producer`]: the backpressure contract for streamed bodies
//!
//! # Limitations
//!
//! - HTTP/1.1 only, one request per connection, no keep-alive
//! - No TLS support (use a reverse proxy for HTTPS)
//! - Request bodies need a `Content-Length`, chunked request bodies are not decoded

pub mod codec;
pub mod connection;
pub mod producer;
pub mod protocol;
pub mod request;
pub mod response;
pub mod settings;

mod context;
pub use context::RequestContext;
pub use settings::Settings;

mod utils;
pub(crate) use utils::ensure;

#[cfg(test)]
mod testing;
