//! The response facade handed to route handlers.
//!
//! A [`Response`] owns the [`ResponseHeader`] under construction and the write side of
//! the connection. The header goes out exactly once: the first call to
//! [`Response::send_header`] serializes and writes it, every later call returns
//! `Ok(())` without touching the transport.
//!
//! [`Response::end`] is the only way to finish an exchange. It sends the header if
//! that has not happened yet, shuts down the write direction and removes the
//! connection from the [`ConnectionManager`].

mod chunked;
mod conclusion;
mod content_type;

pub use conclusion::ConclusionObserver;
pub use content_type::content_type_for;

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio_util::codec::Encoder;
use tracing::{debug, trace};

use crate::codec::HeaderEncoder;
use crate::connection::{ConnectionHandle, ConnectionId, ConnectionManager, ConnectionWriter};
use crate::protocol::{Cookie, ResponseHeader, SendError, status_message};

#[derive(Debug)]
pub struct Response {
    header: ResponseHeader,
    header_sent: bool,
    writer: ConnectionWriter,
    handle: Arc<ConnectionHandle>,
    manager: Arc<ConnectionManager>,
}

impl Response {
    pub(crate) fn new(writer: ConnectionWriter, handle: Arc<ConnectionHandle>, manager: Arc<ConnectionManager>) -> Self {
        Self { header: ResponseHeader::new(), header_sent: false, writer, handle, manager }
    }

    pub fn header(&self) -> &ResponseHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut ResponseHeader {
        &mut self.header
    }

    pub fn is_header_sent(&self) -> bool {
        self.header_sent
    }

    pub fn connection(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// True once the header went out or the connection was stopped.
    pub fn has_concluded(&self) -> bool {
        self.header_sent || self.handle.observer().has_concluded()
    }

    /// The observer shared by everything that may conclude this response.
    pub fn observe_conclusion(&self) -> Arc<ConclusionObserver> {
        self.handle.observer()
    }

    pub fn status(&mut self, code: u16) -> &mut Self {
        self.header.set_code(code);
        self
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.header.set_field(field, value);
        self
    }

    pub fn append(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.header.append_field(field, value);
        self
    }

    /// Sets a field only if it is not set yet.
    pub fn try_set(&mut self, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let field = field.into();
        if !self.header.has_field(&field) {
            self.header.set_field(field, value);
        }
        self
    }

    pub fn remove(&mut self, field: &str) -> &mut Self {
        self.header.remove_field(field);
        self
    }

    pub fn content_type(&mut self, mime: impl AsRef<str>) -> &mut Self {
        self.set("Content-Type", mime.as_ref())
    }

    pub fn location(&mut self, url: impl Into<String>) -> &mut Self {
        self.set("Location", url)
    }

    /// Sets the `Link` field from `(rel, url)` pairs.
    pub fn links<'a>(&mut self, links: impl IntoIterator<Item = (&'a str, &'a str)>) -> &mut Self {
        let value = links.into_iter().map(|(rel, url)| format!("<{url}>; rel=\"{rel}\"")).collect::<Vec<_>>().join(", ");
        self.append("Link", value)
    }

    pub fn set_cookie(&mut self, cookie: Cookie) -> &mut Self {
        self.header.add_cookie(cookie);
        self
    }

    /// Answers `Expect: 100-continue` with an interim `100 Continue`.
    ///
    /// Does nothing once the final header has been sent.
    pub async fn send_continue(&mut self) -> Result<(), SendError> {
        if self.header_sent {
            return Ok(());
        }
        let line = format!("{}/{} 100 Continue\r\n\r\n", self.header.protocol(), self.header.version());
        self.writer.write(line.as_bytes()).await?;
        Ok(())
    }

    /// Writes the header, exactly once.
    pub async fn send_header(&mut self) -> Result<(), SendError> {
        if self.header_sent {
            trace!(connection = self.handle.id(), "header already sent");
            return Ok(());
        }
        let buffer = self.writer.buffer_mut();
        buffer.clear();
        if let Err(e) = HeaderEncoder.encode(&self.header, buffer) {
            buffer.clear();
            return Err(e);
        }
        self.header_sent = true;
        self.handle.observer().conclude();
        self.writer.flush_buffer().await?;
        debug!(connection = self.handle.id(), status = self.header.code(), "response header sent");
        Ok(())
    }

    /// Sends a text body and ends the response.
    pub async fn send(&mut self, body: impl Into<String>) -> Result<(), SendError> {
        self.try_set("Content-Type", mime::TEXT_PLAIN_UTF_8.as_ref());
        self.send_body(Bytes::from(body.into())).await
    }

    /// Sends a binary body and ends the response.
    pub async fn send_bytes(&mut self, body: impl Into<Bytes>) -> Result<(), SendError> {
        self.try_set("Content-Type", mime::APPLICATION_OCTET_STREAM.as_ref());
        self.send_body(body.into()).await
    }

    async fn send_body(&mut self, body: Bytes) -> Result<(), SendError> {
        self.correct_status(!body.is_empty());
        if self.allows_content_length() {
            self.try_set("Content-Length", body.len().to_string());
        }
        self.send_header().await?;
        if !body.is_empty() {
            self.writer.write(&body).await?;
        }
        self.end().await
    }

    /// Streams `len` bytes from `reader` and ends the response.
    pub async fn send_reader<R>(&mut self, reader: &mut R, len: u64) -> Result<(), SendError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.correct_status(len > 0);
        self.try_set("Content-Type", mime::APPLICATION_OCTET_STREAM.as_ref());
        if self.allows_content_length() {
            self.try_set("Content-Length", len.to_string());
        }
        self.send_header().await?;
        let sent = self.writer.write_from(reader).await?;
        trace!(connection = self.handle.id(), bytes = sent, "streamed body");
        self.end().await
    }

    /// Streams a file, its content type derived from the extension.
    ///
    /// Returns `Ok(false)` without sending anything if the file cannot be opened or is
    /// a directory.
    pub async fn send_file(&mut self, path: impl AsRef<Path>) -> Result<bool, SendError> {
        let path = path.as_ref();
        let mut file = match tokio::fs::File::open(path).await {
            Ok(file) => file,
            Err(e) => {
                debug!(path = %path.display(), cause = %e, "cannot open file");
                return Ok(false);
            }
        };
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Ok(false);
        }

        self.try_set("Content-Type", content_type_for(path).as_ref());
        self.status(200);
        self.send_reader(&mut file, metadata.len()).await?;
        Ok(true)
    }

    /// Sends a status with its reason phrase as body, or no body for 204.
    pub async fn send_status(&mut self, code: u16) -> Result<(), SendError> {
        self.status(code);
        if code == 204 {
            self.end().await
        } else {
            self.send(status_message(code)).await
        }
    }

    /// Points the client elsewhere and ends the response.
    pub async fn redirect(&mut self, url: impl Into<String>, code: u16) -> Result<(), SendError> {
        self.location(url).status(code);
        self.end().await
    }

    /// Finishes the exchange and releases the connection.
    pub async fn end(&mut self) -> Result<(), SendError> {
        if !self.header_sent
            && self.allows_content_length()
            && !self.header.has_field("Content-Length")
            && !self.header.has_field("Transfer-Encoding")
        {
            self.header.set_field("Content-Length", "0");
        }

        let sent = self.send_header().await;
        if !self.handle.is_stopped() {
            self.writer.shutdown().await;
        }
        self.manager.remove(self.handle.id());
        sent
    }

    /// 204 and informational responses carry no `Content-Length`.
    fn allows_content_length(&self) -> bool {
        !matches!(self.header.code(), 100..=199 | 204)
    }

    /// 204 with a body becomes 200, 200 without one becomes 204.
    fn correct_status(&mut self, has_body: bool) {
        match (self.header.code(), has_body) {
            (204, true) => {
                self.header.set_code(200);
            }
            (200, false) => {
                self.header.set_code(204);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::testing::{context_for, read_to_string};

    const GET: &str = "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";

    #[tokio::test]
    async fn header_is_written_once() {
        let (mut ctx, mut client, manager) = context_for(GET, Settings::default()).await;
        let res = ctx.response_mut();

        res.status(200).set("X-Test", "1");
        res.send_header().await.unwrap();
        res.set("X-Late", "2");
        res.send_header().await.unwrap();
        res.end().await.unwrap();

        let out = read_to_string(&mut client).await;
        assert_eq!(out.matches("HTTP/1.1").count(), 1);
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(!out.contains("X-Late"));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn send_fills_length_and_type() {
        let (mut ctx, mut client, _manager) = context_for(GET, Settings::default()).await;
        ctx.response_mut().send("hello").await.unwrap();

        let out = read_to_string(&mut client).await;
        assert_eq!(
            out,
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: 5\r\n\r\nhello"
        );
    }

    #[tokio::test]
    async fn empty_ok_becomes_no_content() {
        let (mut ctx, mut client, _manager) = context_for(GET, Settings::default()).await;
        ctx.response_mut().status(200).send_bytes(Bytes::new()).await.unwrap();

        let out = read_to_string(&mut client).await;
        assert!(out.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!out.contains("Content-Length"));
        assert!(out.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn send_status_uses_reason_as_body() {
        let (mut ctx, mut client, _manager) = context_for(GET, Settings::default()).await;
        ctx.response_mut().send_status(404).await.unwrap();

        let out = read_to_string(&mut client).await;
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(out.ends_with("\r\n\r\nNot Found"));
    }

    #[tokio::test]
    async fn end_without_body() {
        let (mut ctx, mut client, _manager) = context_for(GET, Settings::default()).await;
        let res = ctx.response_mut();
        res.set_cookie(Cookie::new("a", "1"));
        res.redirect("/elsewhere", 302).await.unwrap();

        let out = read_to_string(&mut client).await;
        assert_eq!(
            out,
            "HTTP/1.1 302 Found\r\nLocation: /elsewhere\r\nContent-Length: 0\r\nSet-Cookie: a=1\r\n\r\n"
        );
        assert!(ctx.response().has_concluded());
    }

    #[tokio::test]
    async fn header_injection_is_refused() {
        let (mut ctx, mut client, _manager) = context_for(GET, Settings::default()).await;
        let res = ctx.response_mut();
        res.location("/next\r\nSet-Cookie: admin=1").status(302);

        let err = res.send_header().await.unwrap_err();
        assert!(matches!(err, SendError::InvalidHeader { .. }));
        assert!(!res.has_concluded());

        res.redirect("/next", 302).await.unwrap();
        let out = read_to_string(&mut client).await;
        assert_eq!(out, "HTTP/1.1 302 Found\r\nLocation: /next\r\nContent-Length: 0\r\n\r\n");
    }

    #[tokio::test]
    async fn writes_after_stop_are_aborted() {
        let (mut ctx, _client, manager) = context_for(GET, Settings::default()).await;
        manager.remove(ctx.response().connection_id());

        let res = ctx.response_mut();
        assert!(res.has_concluded());
        let err = res.send("late").await.unwrap_err();
        assert!(err.is_aborted());
    }

    #[tokio::test]
    async fn send_file_streams_contents() {
        let dir = std::env::temp_dir().join(format!("hearth-send-file-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("page.html");
        tokio::fs::write(&path, "<p>hi</p>").await.unwrap();

        let (mut ctx, mut client, _manager) = context_for(GET, Settings::default()).await;
        assert!(ctx.response_mut().send_file(&path).await.unwrap());

        let out = read_to_string(&mut client).await;
        assert!(out.contains("Content-Type: text/html; charset=utf-8\r\n"));
        assert!(out.contains("Content-Length: 9\r\n"));
        assert!(out.ends_with("\r\n\r\n<p>hi</p>"));

        let (mut ctx, _client, _manager) = context_for(GET, Settings::default()).await;
        assert!(!ctx.response_mut().send_file(dir.join("missing")).await.unwrap());
        assert!(!ctx.response().has_concluded());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
