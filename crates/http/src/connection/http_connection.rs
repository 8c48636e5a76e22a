use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, trace};

use crate::codec::{ParseProgress, RequestParser};
use crate::connection::ConnectionManager;
use crate::context::RequestContext;
use crate::protocol::{ConnectionError, HttpError, RequestHeader, SendError};
use crate::request::Request;
use crate::response::{ConclusionObserver, Response};
use crate::settings::Settings;

pub type ConnectionId = u64;

type BoxedReader = Box<dyn AsyncRead + Send + Sync + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// The shared, registry owned part of a connection.
///
/// Stopping is one-shot: the first [`ConnectionHandle::stop`] cancels all pending
/// reads and writes of the connection, which then resolve to
/// [`ConnectionError::Aborted`], and marks the response observer as dead.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    stopped: AtomicBool,
    timed_out: AtomicBool,
    cancel: CancellationToken,
    observer: Arc<ConclusionObserver>,
}

impl ConnectionHandle {
    pub(crate) fn new(id: ConnectionId, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            id,
            remote_addr,
            stopped: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            observer: Arc::new(ConclusionObserver::new()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Whether the read watchdog fired on this connection.
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    /// Observer of the response currently bound to this connection.
    pub fn observer(&self) -> Arc<ConclusionObserver> {
        Arc::clone(&self.observer)
    }

    /// Stops the connection, returning false if it was already stopped.
    pub fn stop(&self) -> bool {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.observer.has_died();
        self.cancel.cancel();
        debug!(connection = self.id, "connection stopped");
        true
    }

    pub(crate) fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    fn mark_timed_out(&self) {
        self.timed_out.store(true, Ordering::Release);
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.remote_addr {
            Some(addr) => write!(f, "#{} ({addr})", self.id),
            None => write!(f, "#{}", self.id),
        }
    }
}

/// Which continuation consumes the bytes delivered by reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPhase {
    Header,
    Body,
}

/// Read side of a connection: the transport read half, the fixed read buffer and the
/// read watchdog.
///
/// `read` takes `&mut self`, so there is never more than one outstanding read.
pub struct ConnectionReader {
    io: BoxedReader,
    buffer: Box<[u8]>,
    filled: usize,
    read_timeout: Option<Duration>,
    phase: ReadPhase,
    handle: Arc<ConnectionHandle>,
}

impl fmt::Debug for ConnectionReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionReader")
            .field("connection", &self.handle.id)
            .field("buffer_size", &self.buffer.len())
            .field("filled", &self.filled)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl ConnectionReader {
    /// Reads once into the read buffer, racing the read against the deadline and the
    /// connection's cancellation.
    ///
    /// A completed read of zero bytes means the peer closed the connection.
    pub async fn read(&mut self) -> Result<usize, ConnectionError> {
        let Self { io, buffer, filled, read_timeout, phase, handle } = self;
        *filled = 0;
        if handle.is_stopped() {
            return Err(ConnectionError::Aborted);
        }

        let result = select! {
            biased;
            () = handle.cancelled() => Err(ConnectionError::Aborted),
            result = with_deadline(*read_timeout, io.read(buffer)) => result,
        };

        match result {
            Ok(0) => Err(ConnectionError::Closed),
            Ok(n) => {
                *filled = n;
                trace!(connection = handle.id, bytes = n, phase = ?phase, "read completed");
                Ok(n)
            }
            Err(ConnectionError::TimedOut) => {
                debug!(connection = handle.id, phase = ?phase, "read deadline expired");
                handle.mark_timed_out();
                Err(ConnectionError::TimedOut)
            }
            Err(e) => Err(e),
        }
    }

    /// Bytes delivered by the last read.
    pub fn filled(&self) -> &[u8] {
        &self.buffer[..self.filled]
    }

    pub fn phase(&self) -> ReadPhase {
        self.phase
    }

    /// Hands subsequent reads over to body reading. There is no way back to the header.
    pub(crate) fn begin_body(&mut self) {
        if self.phase == ReadPhase::Header {
            trace!(connection = self.handle.id, "read continuation switched to body");
            self.phase = ReadPhase::Body;
        }
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }
}

async fn with_deadline<F>(deadline: Option<Duration>, read: F) -> Result<usize, ConnectionError>
where
    F: Future<Output = io::Result<usize>>,
{
    match deadline {
        Some(deadline) => match tokio::time::timeout(deadline, read).await {
            Ok(result) => result.map_err(ConnectionError::from),
            Err(_) => Err(ConnectionError::TimedOut),
        },
        None => read.await.map_err(ConnectionError::from),
    }
}

/// Write side of a connection: the transport write half and the write buffer.
///
/// Like reads, writes take `&mut self` and are therefore never issued concurrently.
pub struct ConnectionWriter {
    io: BoxedWriter,
    buffer: BytesMut,
    chunk_size: usize,
    handle: Arc<ConnectionHandle>,
}

impl fmt::Debug for ConnectionWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionWriter")
            .field("connection", &self.handle.id)
            .field("pending", &self.buffer.len())
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl ConnectionWriter {
    /// Copies `data` into the write buffer and writes it out.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, ConnectionError> {
        self.buffer.clear();
        self.buffer.extend_from_slice(data);
        self.flush_buffer().await
    }

    /// The write buffer, for encoders that serialize straight into it.
    pub(crate) fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Writes out and clears whatever is in the write buffer.
    pub async fn flush_buffer(&mut self) -> Result<usize, ConnectionError> {
        let Self { io, buffer, handle, .. } = self;
        if handle.is_stopped() {
            return Err(ConnectionError::Aborted);
        }

        let len = buffer.len();
        select! {
            biased;
            () = handle.cancelled() => return Err(ConnectionError::Aborted),
            result = async {
                io.write_all(buffer).await?;
                io.flush().await
            } => result?,
        }
        buffer.clear();
        trace!(connection = handle.id, bytes = len, "write completed");
        Ok(len)
    }

    /// Streams `reader` to the peer by repeatedly filling the write buffer until the
    /// reader is exhausted.
    pub async fn write_from<R>(&mut self, reader: &mut R) -> Result<u64, SendError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut total = 0u64;
        loop {
            self.buffer.clear();
            self.buffer.resize(self.chunk_size, 0);
            let n = reader.read(&mut self.buffer[..]).await?;
            if n == 0 {
                self.buffer.clear();
                return Ok(total);
            }
            self.buffer.truncate(n);
            self.flush_buffer().await?;
            total += n as u64;
        }
    }

    /// Shuts down the write direction of the transport.
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.io.shutdown().await {
            trace!(connection = self.handle.id, cause = %e, "shutdown failed");
        }
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }
}

/// One accepted transport connection.
///
/// A connection is created by [`ConnectionManager::create`], reads and parses one
/// request header and is then turned into a [`RequestContext`] that owns the request
/// and response facades for the rest of the exchange.
pub struct Connection {
    reader: ConnectionReader,
    writer: ConnectionWriter,
    handle: Arc<ConnectionHandle>,
    manager: Arc<ConnectionManager>,
    settings: Arc<Settings>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").field("handle", &self.handle).finish_non_exhaustive()
    }
}

impl Connection {
    pub(crate) fn new<T>(
        io: T,
        handle: Arc<ConnectionHandle>,
        manager: Arc<ConnectionManager>,
        settings: Arc<Settings>,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + Sync + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let reader = ConnectionReader {
            io: Box::new(read_half),
            buffer: vec![0; settings.read_buffer_size.max(1)].into_boxed_slice(),
            filled: 0,
            read_timeout: settings.read_timeout,
            phase: ReadPhase::Header,
            handle: Arc::clone(&handle),
        };
        let writer = ConnectionWriter {
            io: Box::new(write_half),
            buffer: BytesMut::with_capacity(settings.write_buffer_size),
            chunk_size: settings.write_buffer_size.max(1),
            handle: Arc::clone(&handle),
        };
        Self { reader, writer, handle, manager, settings }
    }

    pub fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Reads until the header section is complete.
    ///
    /// On success the returned parser holds the header and any body bytes that
    /// arrived with it.
    pub async fn read_header(&mut self) -> Result<RequestParser, HttpError> {
        debug_assert_eq!(self.reader.phase(), ReadPhase::Header);
        let mut parser = RequestParser::with_limits(self.settings.max_header_bytes, self.settings.max_header_fields);
        loop {
            self.reader.read().await?;
            if parser.feed(self.reader.filled())? == ParseProgress::Finished {
                trace!(connection = self.handle.id, "header section complete");
                return Ok(parser);
            }
        }
    }

    /// Binds the parsed request and a fresh response to this connection.
    pub fn bind(self, parser: RequestParser) -> RequestContext {
        let (raw, leftover) = parser.into_parts();
        let header = RequestHeader::from(raw);
        debug!(connection = self.handle.id, request = %header, "request received");

        let request = Request::new(header, leftover, self.reader, self.settings.trust_proxy);
        let response = Response::new(self.writer, self.handle, self.manager);
        RequestContext::new(request, response)
    }

    /// A response for answering a request whose header never completed.
    pub fn into_response(self) -> Response {
        Response::new(self.writer, self.handle, self.manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::connection_with;

    #[tokio::test]
    async fn reads_header_across_writes() {
        let (mut connection, mut client, _manager) = connection_with(Settings::default());

        tokio::spawn(async move {
            client.write_all(b"GET /a HTTP/1.1\r\nHo").await.unwrap();
            tokio::task::yield_now().await;
            client.write_all(b"st: x\r\n\r\nbody").await.unwrap();
            client
        });

        let parser = connection.read_header().await.unwrap();
        assert_eq!(parser.header().url, "/a");
        assert_eq!(parser.leftover(), b"body");
    }

    #[tokio::test]
    async fn read_deadline_marks_the_handle() {
        let settings = Settings { read_timeout: Some(Duration::from_millis(20)), ..Settings::default() };
        let (mut connection, _client, _manager) = connection_with(settings);

        let err = connection.read_header().await.unwrap_err();
        assert!(matches!(err, HttpError::ConnectionError { source: ConnectionError::TimedOut }));
        assert!(connection.handle().timed_out());
    }

    #[tokio::test]
    async fn peer_close_is_reported() {
        let (mut connection, client, _manager) = connection_with(Settings::default());
        drop(client);

        let err = connection.read_header().await.unwrap_err();
        assert!(matches!(err, HttpError::ConnectionError { source: ConnectionError::Closed }));
    }

    #[tokio::test]
    async fn stop_aborts_pending_read() {
        let (mut connection, _client, _manager) = connection_with(Settings::default());
        let handle = Arc::clone(connection.handle());

        let stopper = tokio::spawn(async move {
            tokio::task::yield_now().await;
            handle.stop()
        });

        let err = connection.read_header().await.unwrap_err();
        assert!(err.is_aborted());
        assert!(stopper.await.unwrap());
        assert!(!connection.handle().stop());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn observer_is_dead_before_cancellation_wakes_waiters() {
        let handle = Arc::new(ConnectionHandle::new(7, None));
        let waiter = Arc::clone(&handle);
        let seen_alive = tokio::spawn(async move {
            waiter.cancelled().await;
            waiter.observer().is_alive()
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.stop());
        assert!(!seen_alive.await.unwrap());
    }
}
