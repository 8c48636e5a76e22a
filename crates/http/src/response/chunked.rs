use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::select;
use tokio::sync::Notify;
use tokio_util::codec::Encoder;
use tracing::{debug, trace};

use crate::codec::{BodyChunk, ChunkedEncoder};
use crate::producer::Producer;
use crate::protocol::{ConnectionError, SendError};
use crate::response::Response;

impl Response {
    /// Streams the output of `producer` with chunked transfer-encoding and ends the
    /// response.
    ///
    /// Each produce signal turns everything available into one chunk. Empty chunks are
    /// never written. Once the producer is complete and drained the terminal chunk goes
    /// out and the producer's production ends. If the connection dies first, production
    /// ends with a connection reset error.
    pub async fn send_chunked(&mut self, producer: Arc<dyn Producer>) -> Result<(), SendError> {
        if self.header().code() == 204 {
            self.status(200);
        }
        if !producer.encoding().is_empty() {
            self.try_set("Content-Encoding", producer.encoding());
        }
        self.remove("Content-Length");
        self.set("Transfer-Encoding", "chunked");

        let notify = Arc::new(Notify::new());
        let signal = Arc::clone(&notify);
        producer.set_on_produce_cb(Arc::new(move || signal.notify_one()));

        if let Err(e) = self.send_header().await {
            producer.end_production(Some(to_io_error(&e)));
            return Err(e);
        }
        producer.start_production();

        let observer = self.observe_conclusion();
        let mut encoder = ChunkedEncoder::new();
        loop {
            if !observer.is_alive() {
                debug!(connection = self.connection_id(), "response concluded while streaming, aborting production");
                producer.end_production(Some(io::Error::from(io::ErrorKind::ConnectionReset)));
                return Err(ConnectionError::Aborted.into());
            }

            let available = producer.available();
            if available > 0 {
                let data = producer.data();
                let chunk = data.slice(..available.min(data.len()));
                if !chunk.is_empty() {
                    let len = chunk.len();
                    self.write_payload(&mut encoder, BodyChunk::Data(chunk), producer.as_ref()).await?;
                    producer.has_consumed(len);
                    trace!(connection = self.connection_id(), bytes = len, "chunk written");
                    continue;
                }
            }

            if producer.complete() {
                self.write_payload(&mut encoder, BodyChunk::Last, producer.as_ref()).await?;
                producer.end_production(None);
                trace!(connection = self.connection_id(), bytes = encoder.send_size(), "chunked body complete");
                return self.end().await;
            }

            select! {
                biased;
                () = self.connection().cancelled() => {}
                () = notify.notified() => {}
            }
        }
    }

    async fn write_payload(
        &mut self,
        encoder: &mut ChunkedEncoder,
        item: BodyChunk<Bytes>,
        producer: &dyn Producer,
    ) -> Result<(), SendError> {
        let buffer = self.writer.buffer_mut();
        buffer.clear();
        encoder.encode(item, buffer)?;

        if let Err(e) = self.writer.flush_buffer().await {
            let error = e.to_io_error();
            if !e.is_aborted() {
                producer.on_error(&error);
            }
            producer.end_production(Some(error));
            return Err(e.into());
        }
        Ok(())
    }
}

fn to_io_error(error: &SendError) -> io::Error {
    match error {
        SendError::Connection { source } => source.to_io_error(),
        SendError::Concluded => io::Error::from(io::ErrorKind::ConnectionReset),
        SendError::Io { source } => io::Error::new(source.kind(), source.to_string()),
        SendError::InvalidHeader { reason } => io::Error::new(io::ErrorKind::InvalidInput, reason.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::StreamingProducer;
    use crate::settings::Settings;
    use crate::testing::{context_for, read_to_string};
    use std::sync::atomic::{AtomicBool, Ordering};

    const GET: &str = "GET /stream HTTP/1.1\r\n\r\n";

    /// Splits a chunked body into its chunks, the terminal chunk included.
    fn chunks(body: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut rest = body;
        loop {
            let (size, tail) = rest.split_once("\r\n").unwrap();
            let size = usize::from_str_radix(size, 16).unwrap();
            out.push(tail[..size].to_owned());
            assert_eq!(&tail[size..size + 2], "\r\n");
            rest = &tail[size + 2..];
            if size == 0 {
                assert!(rest.is_empty(), "bytes after the terminal chunk: {rest:?}");
                return out;
            }
        }
    }

    #[tokio::test]
    async fn buffered_data_then_terminal_chunk() {
        let (mut ctx, mut client, manager) = context_for(GET, Settings::default()).await;
        let producer = Arc::new(StreamingProducer::new());
        producer.push("hello world");
        producer.finish();

        ctx.response_mut().send_chunked(Arc::clone(&producer) as Arc<dyn Producer>).await.unwrap();

        let out = read_to_string(&mut client).await;
        let (head, body) = out.split_once("\r\n\r\n").unwrap();
        assert!(head.starts_with("HTTP/1.1 200 OK"));
        assert!(head.contains("Transfer-Encoding: chunked"));
        assert!(!head.contains("Content-Length"));
        assert_eq!(body, "B\r\nhello world\r\n0\r\n\r\n");
        assert_eq!(producer.available(), 0);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn concurrent_pushes_never_write_empty_chunks() {
        let (mut ctx, mut client, _manager) = context_for(GET, Settings::default()).await;
        let producer = Arc::new(StreamingProducer::with_encoding("identity"));

        let feeder = Arc::clone(&producer);
        tokio::spawn(async move {
            for part in ["alpha", "", "beta", "gamma"] {
                feeder.push(part);
                feeder.flush();
                tokio::task::yield_now().await;
            }
            feeder.finish();
        });

        ctx.response_mut().send_chunked(producer).await.unwrap();

        let out = read_to_string(&mut client).await;
        let (head, body) = out.split_once("\r\n\r\n").unwrap();
        assert!(head.contains("Content-Encoding: identity"));

        let chunks = chunks(body);
        let (terminal, data) = chunks.split_last().unwrap();
        assert!(terminal.is_empty());
        assert!(data.iter().all(|chunk| !chunk.is_empty()));
        assert_eq!(data.concat(), "alphabetagamma");
    }

    #[tokio::test]
    async fn stopped_connection_aborts_production() {
        let (mut ctx, _client, manager) = context_for(GET, Settings::default()).await;
        let producer = Arc::new(StreamingProducer::new());
        let reset = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&reset);
        producer.on_finish(move |error| {
            let kind = error.map(|e| e.kind());
            seen.store(kind == Some(io::ErrorKind::ConnectionReset), Ordering::SeqCst);
        });

        let id = ctx.response().connection_id();
        let stopper = tokio::spawn(async move {
            tokio::task::yield_now().await;
            manager.remove(id)
        });

        let err = ctx.response_mut().send_chunked(producer).await.unwrap_err();
        assert!(err.is_aborted());
        assert!(stopper.await.unwrap());
        assert!(reset.load(Ordering::SeqCst));
    }
}
