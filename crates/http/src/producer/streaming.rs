use std::cell::RefCell;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use bytes::{Buf, BytesMut};
use parking_lot::{Mutex, ReentrantMutex};
use tracing::debug;

use crate::producer::{ErrorCallback, FinishCallback, ProduceCallback, Producer, ProducerCallbacks};

/// A producer fed by pushing bytes into it from any thread.
///
/// Pushed bytes are signalled to the writer right away. [`StreamingProducer::finish`]
/// marks the end of the stream. The buffer lock is re-entrant, so code running inside
/// [`Producer::buffer_locked_do`] may call back into `available` or `data` on the same
/// thread. Pushing from inside that closure is not supported.
pub struct StreamingProducer {
    buffer: ReentrantMutex<RefCell<BytesMut>>,
    available: AtomicUsize,
    completed: AtomicBool,
    encoding: String,
    callbacks: ProducerCallbacks,
    on_error: Mutex<Option<ErrorCallback>>,
}

impl fmt::Debug for StreamingProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingProducer")
            .field("available", &self.available())
            .field("completed", &self.complete())
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl Default for StreamingProducer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingProducer {
    pub fn new() -> Self {
        Self::with_encoding("")
    }

    /// A producer whose bytes are already encoded, `encoding` becomes the
    /// `Content-Encoding` of the response.
    pub fn with_encoding(encoding: impl Into<String>) -> Self {
        Self {
            buffer: ReentrantMutex::new(RefCell::new(BytesMut::new())),
            available: AtomicUsize::new(0),
            completed: AtomicBool::new(false),
            encoding: encoding.into(),
            callbacks: ProducerCallbacks::default(),
            on_error: Mutex::new(None),
        }
    }

    /// Appends bytes and signals the writer. Pushing after `finish` is ignored.
    pub fn push(&self, data: impl AsRef<[u8]>) {
        let data = data.as_ref();
        if data.is_empty() {
            return;
        }
        if self.complete() {
            debug!(bytes = data.len(), "dropping bytes pushed after finish");
            return;
        }
        {
            let guard = self.buffer.lock();
            let mut buffer = guard.borrow_mut();
            buffer.extend_from_slice(data);
            self.available.store(buffer.len(), Ordering::Release);
        }
        self.callbacks.produced_data();
    }

    /// Signals the writer without new data, to make it re-check the buffer.
    pub fn flush(&self) {
        self.callbacks.produced_data();
    }

    /// Ends the stream. Bytes still buffered are written before the terminal chunk.
    pub fn finish(&self) {
        self.completed.store(true, Ordering::Release);
        self.callbacks.produced_data();
    }

    /// Called with the outcome once the response writer is done with this producer.
    pub fn on_finish(&self, callback: impl FnOnce(Option<io::Error>) + Send + 'static) {
        let callback: FinishCallback = Box::new(callback);
        self.callbacks.set_on_finish(callback);
    }

    pub fn on_write_error(&self, callback: impl Fn(&io::Error) + Send + Sync + 'static) {
        *self.on_error.lock() = Some(Box::new(callback));
    }
}

impl Producer for StreamingProducer {
    fn encoding(&self) -> &str {
        &self.encoding
    }

    fn available(&self) -> usize {
        self.available.load(Ordering::Acquire)
    }

    fn buffer_locked_do(&self, f: &mut dyn FnMut(&[u8])) {
        let guard = self.buffer.lock();
        let buffer = guard.borrow();
        f(&buffer);
    }

    fn complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    fn has_consumed(&self, amount: usize) {
        let remaining = {
            let guard = self.buffer.lock();
            let mut buffer = guard.borrow_mut();
            debug_assert!(amount <= buffer.len(), "consumed more than was available");
            let take = amount.min(buffer.len());
            buffer.advance(take);
            self.available.store(buffer.len(), Ordering::Release);
            buffer.len()
        };
        if remaining > 0 {
            self.callbacks.produced_data();
        }
    }

    fn on_error(&self, error: &io::Error) {
        debug!(cause = %error, "streaming producer failed");
        if let Some(callback) = self.on_error.lock().as_ref() {
            callback(error);
        }
    }

    fn set_on_produce_cb(&self, callback: ProduceCallback) {
        self.callbacks.set_on_produce(callback);
    }

    fn end_production(&self, error: Option<io::Error>) {
        self.completed.store(true, Ordering::Release);
        self.callbacks.finish(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn consuming_everything_leaves_nothing() {
        let producer = StreamingProducer::new();
        producer.push("hello ");
        producer.push(b"world");

        let available = producer.available();
        assert_eq!(available, 11);
        assert_eq!(&producer.data()[..], b"hello world");

        producer.has_consumed(available);
        assert_eq!(producer.available(), 0);
        assert!(producer.data().is_empty());
    }

    #[test]
    fn partial_consume_resignals() {
        let producer = StreamingProducer::new();
        let signals = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&signals);
        producer.set_on_produce_cb(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        producer.push("abcdef");
        assert_eq!(signals.load(Ordering::SeqCst), 1);

        producer.has_consumed(4);
        assert_eq!(producer.available(), 2);
        assert_eq!(&producer.data()[..], b"ef");
        assert_eq!(signals.load(Ordering::SeqCst), 2);

        producer.has_consumed(2);
        assert_eq!(signals.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn nested_lock_on_same_thread() {
        let producer = StreamingProducer::new();
        producer.push("xyz");

        let mut seen = 0;
        producer.buffer_locked_do(&mut |data| {
            seen = data.len() + producer.data().len();
        });
        assert_eq!(seen, 6);
    }

    #[test]
    fn finish_callback_runs_once() {
        let producer = StreamingProducer::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        producer.on_finish(move |error| {
            assert!(error.is_none());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        producer.end_production(None);
        producer.end_production(None);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(producer.complete());
    }

    #[test]
    fn push_after_finish_is_dropped() {
        let producer = StreamingProducer::new();
        producer.finish();
        producer.push("late");

        assert_eq!(producer.available(), 0);
    }
}
