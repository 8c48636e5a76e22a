//! Connection handling.
//!
//! - [`Connection`]: one accepted transport, split into a [`ConnectionReader`] with the
//!   fixed read buffer and the read deadline, and a [`ConnectionWriter`] with the write
//!   buffer
//! - [`ConnectionHandle`]: the shared part of a connection, used to stop it from any
//!   task and to observe whether its response concluded
//! - [`ConnectionManager`]: the registry owning every live connection handle
//!
//! Reads and writes take `&mut self`, so a connection never has two reads or two
//! writes in flight. Stopping a connection cancels whatever is pending, which then
//! completes with [`ConnectionError::Aborted`](crate::protocol::ConnectionError::Aborted).
//! Callers treat that as a silent end of the exchange.

mod http_connection;
mod manager;

pub use http_connection::{Connection, ConnectionHandle, ConnectionId, ConnectionReader, ConnectionWriter, ReadPhase};
pub use manager::ConnectionManager;
