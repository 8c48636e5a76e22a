//! The request facade handed to route handlers.
//!
//! A [`Request`] owns the frozen [`RequestHeader`], the route parameters, the read
//! side of the connection and the body bytes that arrived together with the header.
//! The body is only read on demand, through [`Request::read_body`] and a
//! [`ReadSink`].

mod sink;

pub use sink::{BufferSink, ReadSink, StreamSink};

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use tracing::{debug, trace};

use crate::connection::{ConnectionHandle, ConnectionId, ConnectionReader};
use crate::protocol::{BodyError, RequestHeader};

#[derive(Debug)]
pub struct Request {
    header: RequestHeader,
    params: HashMap<String, String>,
    patched_cookies: HashMap<String, String>,
    reader: ConnectionReader,
    leftover: BytesMut,
    trust_proxy: bool,
}

impl Request {
    pub(crate) fn new(header: RequestHeader, leftover: BytesMut, reader: ConnectionReader, trust_proxy: bool) -> Self {
        Self { header, params: HashMap::new(), patched_cookies: HashMap::new(), reader, leftover, trust_proxy }
    }

    pub fn header(&self) -> &RequestHeader {
        &self.header
    }

    pub fn method(&self) -> &str {
        self.header.method()
    }

    pub fn url(&self) -> &str {
        self.header.url()
    }

    pub fn path(&self) -> &str {
        self.header.path()
    }

    pub fn protocol(&self) -> &str {
        self.header.protocol()
    }

    pub fn version(&self) -> &str {
        self.header.version()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.header.field(name)
    }

    pub fn query(&self, key: &str) -> Option<&str> {
        self.header.query(key)
    }

    /// A cookie sent by the client, or one patched in while handling the request.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.patched_cookies.get(name).map(String::as_str).or_else(|| self.header.cookie(name))
    }

    /// Makes a cookie visible to later handlers of this request without touching the
    /// received header, used when a session gets created mid-request.
    pub fn patch_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.patched_cookies.insert(name.into(), value.into());
    }

    /// A named route parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }

    pub fn connection(&self) -> &Arc<ConnectionHandle> {
        self.reader.handle()
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.reader.handle().id()
    }

    /// Host name the client addressed, without port.
    ///
    /// Behind a trusted proxy `X-Forwarded-Host` takes precedence over `Host`.
    pub fn hostname(&self) -> Option<&str> {
        let forwarded = self.trust_proxy.then(|| self.field("X-Forwarded-Host")).flatten();
        let host = forwarded.or_else(|| self.field("Host"))?;
        let host = host.split(',').next().unwrap_or(host).trim();
        Some(strip_port(host))
    }

    /// Address of the client.
    ///
    /// Behind a trusted proxy this is the first `X-Forwarded-For` entry.
    pub fn ip(&self) -> Option<String> {
        if self.trust_proxy {
            let forwarded = self.field("X-Forwarded-For").and_then(|list| list.split(',').next()).map(str::trim);
            if let Some(client) = forwarded.filter(|client| !client.is_empty()) {
                return Some(client.to_owned());
            }
        }
        self.connection().remote_addr().map(|addr| addr.ip().to_string())
    }

    pub fn port(&self) -> Option<u16> {
        self.connection().remote_addr().map(|addr| addr.port())
    }

    /// True when the client waits for `100 Continue` before sending the body.
    pub fn expects_continue(&self) -> bool {
        self.field("Expect").is_some_and(|expect| expect.eq_ignore_ascii_case("100-continue"))
    }

    /// The announced body length, [`BodyError::LengthRequired`] if missing or not a
    /// non-negative integer.
    pub fn content_length(&self) -> Result<u64, BodyError> {
        self.field("Content-Length").and_then(|value| value.trim().parse().ok()).ok_or(BodyError::LengthRequired)
    }

    /// Reads the body into `sink`, at most `max_bytes` of it (`0` means no cap).
    ///
    /// Body bytes that arrived along with the header are drained first, further reads
    /// go to the connection until `Content-Length` bytes were written or the cap is
    /// hit. Hitting the cap is not an error: compare the returned count, or
    /// [`ReadSink::total_bytes_written`], with [`Request::content_length`] to detect
    /// truncation.
    pub async fn read_body<S>(&mut self, sink: &mut S, max_bytes: u64) -> Result<u64, BodyError>
    where
        S: ReadSink + ?Sized,
    {
        let content_length = self.content_length()?;
        let cap = if max_bytes == 0 { content_length } else { content_length.min(max_bytes) };
        self.reader.begin_body();

        let mut written = 0u64;
        if !self.leftover.is_empty() {
            let take = clamp(cap, self.leftover.len());
            let head = self.leftover.split_to(take);
            written += write_all(sink, &head).await?;
            trace!(connection = self.connection_id(), bytes = take, "body bytes taken from header buffer");
        }

        while written < cap {
            let n = self.reader.read().await?;
            let amount = clamp(cap - written, n);
            written += write_all(sink, &self.reader.filled()[..amount]).await?;
        }

        sink.flush().await.map_err(BodyError::sink)?;
        if written < content_length {
            debug!(connection = self.connection_id(), written, content_length, "request body truncated at cap");
        }
        Ok(written)
    }

    pub async fn read_body_to_vec(&mut self, max_bytes: u64) -> Result<Vec<u8>, BodyError> {
        let mut sink = BufferSink::new();
        self.read_body(&mut sink, max_bytes).await?;
        Ok(sink.into_bytes().into())
    }

    /// Reads the body as text, replacing invalid UTF-8 sequences.
    pub async fn read_body_to_string(&mut self, max_bytes: u64) -> Result<String, BodyError> {
        let body = self.read_body_to_vec(max_bytes).await?;
        Ok(String::from_utf8(body).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned()))
    }
}

fn clamp(remaining: u64, available: usize) -> usize {
    usize::try_from(remaining).map_or(available, |remaining| remaining.min(available))
}

async fn write_all<S>(sink: &mut S, mut data: &[u8]) -> Result<u64, BodyError>
where
    S: ReadSink + ?Sized,
{
    let len = data.len() as u64;
    while !data.is_empty() {
        let n = sink.write(data).await.map_err(BodyError::sink)?;
        if n == 0 {
            return Err(BodyError::sink(io::Error::from(io::ErrorKind::WriteZero)));
        }
        data = &data[n..];
    }
    Ok(len)
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split_once(']').map_or(host, |(ip, _)| ip);
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::testing::context_for;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn drains_leftover_then_reads_more() {
        let (mut ctx, mut client, _manager) =
            context_for("POST /upload HTTP/1.1\r\nContent-Length: 10\r\n\r\nhello", Settings::default()).await;

        client.write_all(b"world").await.unwrap();
        let mut sink = BufferSink::new();
        let read = ctx.request_mut().read_body(&mut sink, 0).await.unwrap();

        assert_eq!(read, 10);
        assert_eq!(sink.as_slice(), b"helloworld");
        assert_eq!(sink.total_bytes_written(), 10);
    }

    #[tokio::test]
    async fn cap_truncates_without_error() {
        let (mut ctx, _client, _manager) =
            context_for("PUT /x HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world", Settings::default()).await;

        let body = ctx.request_mut().read_body_to_string(5).await.unwrap();
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn cap_stops_further_reads() {
        let (mut ctx, mut client, _manager) =
            context_for("PUT /x HTTP/1.1\r\nContent-Length: 8\r\n\r\nab", Settings::default()).await;

        client.write_all(b"cdefgh").await.unwrap();
        let body = ctx.request_mut().read_body_to_vec(4).await.unwrap();
        assert_eq!(body, b"abcd");
    }

    #[tokio::test]
    async fn missing_content_length() {
        let (mut ctx, _client, _manager) = context_for("POST / HTTP/1.1\r\n\r\n", Settings::default()).await;

        let err = ctx.request_mut().read_body_to_vec(0).await.unwrap_err();
        assert!(matches!(err, BodyError::LengthRequired));
    }

    #[tokio::test]
    async fn invalid_content_length() {
        let (mut ctx, _client, _manager) =
            context_for("POST / HTTP/1.1\r\nContent-Length: -3\r\n\r\n", Settings::default()).await;

        assert!(matches!(ctx.request().content_length(), Err(BodyError::LengthRequired)));
    }

    #[tokio::test]
    async fn peer_hangs_up_mid_body() {
        let (mut ctx, client, _manager) =
            context_for("POST / HTTP/1.1\r\nContent-Length: 100\r\n\r\npartial", Settings::default()).await;
        drop(client);

        let err = ctx.request_mut().read_body_to_vec(0).await.unwrap_err();
        assert!(matches!(err, BodyError::Connection { .. }));
        assert!(!err.is_aborted());
    }

    #[tokio::test]
    async fn forwarded_headers_need_trust() {
        let raw = "GET / HTTP/1.1\r\nHost: internal:8080\r\nX-Forwarded-Host: example.org\r\nX-Forwarded-For: 203.0.113.9, 10.0.0.1\r\n\r\n";

        let (ctx, _client, _manager) = context_for(raw, Settings::default()).await;
        assert_eq!(ctx.request().hostname(), Some("internal"));
        assert_eq!(ctx.request().ip(), None);

        let trusted = Settings { trust_proxy: true, ..Settings::default() };
        let (ctx, _client, _manager) = context_for(raw, trusted).await;
        assert_eq!(ctx.request().hostname(), Some("example.org"));
        assert_eq!(ctx.request().ip().as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn strips_ports() {
        assert_eq!(strip_port("localhost:80"), "localhost");
        assert_eq!(strip_port("[::1]:8080"), "::1");
        assert_eq!(strip_port("example.org"), "example.org");
    }
}
