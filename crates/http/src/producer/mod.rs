//! The streaming producer contract.
//!
//! A [`Producer`] emits a lazily growing byte stream with explicit backpressure. The
//! chunked response writer drives it:
//!
//! 1. it registers a produce callback through [`Producer::set_on_produce_cb`]
//! 2. on each signal it reads [`Producer::available`], does nothing when that is zero,
//!    and otherwise copies the bytes out under [`Producer::buffer_locked_do`], frames
//!    them as one chunk and writes them
//! 3. after a successful write it reports [`Producer::has_consumed`] with exactly the
//!    amount it took, never more than was available
//! 4. once [`Producer::complete`] holds and nothing is left it writes the terminal
//!    chunk and calls [`Producer::end_production`]
//!
//! When the response concludes underneath the writer (the connection died), production
//! ends with a [`std::io::ErrorKind::ConnectionReset`] error instead.

mod streaming;

pub use streaming::StreamingProducer;

use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::Arc;

pub type ProduceCallback = Arc<dyn Fn() + Send + Sync>;
pub type FinishCallback = Box<dyn FnOnce(Option<io::Error>) + Send>;
pub type ErrorCallback = Box<dyn Fn(&io::Error) + Send + Sync>;

pub trait Producer: Send + Sync {
    /// Value for `Content-Encoding`, empty when the bytes are not encoded.
    fn encoding(&self) -> &str {
        ""
    }

    /// Number of bytes ready to be taken.
    fn available(&self) -> usize;

    /// Runs `f` on the available bytes while the producer's buffer is locked.
    fn buffer_locked_do(&self, f: &mut dyn FnMut(&[u8]));

    /// A copy of the available bytes, taken under the buffer lock.
    fn data(&self) -> Bytes {
        let mut data = Bytes::new();
        self.buffer_locked_do(&mut |available| data = Bytes::copy_from_slice(available));
        data
    }

    /// True once no more bytes will be appended.
    fn complete(&self) -> bool;

    /// Drops `amount` bytes from the front of the buffer.
    fn has_consumed(&self, amount: usize);

    fn on_error(&self, error: &io::Error);

    fn set_on_produce_cb(&self, callback: ProduceCallback);

    fn start_production(&self) {}

    /// Ends production, `None` on success.
    fn end_production(&self, error: Option<io::Error>);
}

/// Callback bookkeeping shared by producer implementations.
#[derive(Default)]
pub struct ProducerCallbacks {
    on_produce: Mutex<Option<ProduceCallback>>,
    on_finish: Mutex<Option<FinishCallback>>,
}

impl fmt::Debug for ProducerCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerCallbacks")
            .field("on_produce", &self.on_produce.lock().is_some())
            .field("on_finish", &self.on_finish.lock().is_some())
            .finish()
    }
}

impl ProducerCallbacks {
    pub fn set_on_produce(&self, callback: ProduceCallback) {
        *self.on_produce.lock() = Some(callback);
    }

    pub fn set_on_finish(&self, callback: FinishCallback) {
        *self.on_finish.lock() = Some(callback);
    }

    /// Signals the driving writer that new data may be available.
    pub fn produced_data(&self) {
        let callback = self.on_produce.lock().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Runs the finish callback, at most once.
    pub fn finish(&self, error: Option<io::Error>) {
        let callback = self.on_finish.lock().take();
        if let Some(callback) = callback {
            callback(error);
        }
    }
}
