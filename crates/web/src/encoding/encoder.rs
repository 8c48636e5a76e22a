use crate::encoding::Writer;
use bytes::Bytes;
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use hearth_http::producer::{ProduceCallback, Producer, StreamingProducer};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::io::Write;
use tracing::{trace, warn};
use zstd::stream::write::Encoder as ZstdEncoder;
// (almost thanks and) copy from actix-http: https://github.com/actix/actix-web/blob/master/actix-http/src/encoding/encoder.rs

/// A compression scheme usable as `Content-Encoding`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
    Brotli,
    Zstd,
}

impl ContentEncoding {
    /// Server side preference, best first.
    const PREFERENCE: [Self; 4] = [Self::Zstd, Self::Brotli, Self::Gzip, Self::Deflate];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
            Self::Brotli => "br",
            Self::Zstd => "zstd",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        Self::PREFERENCE
            .into_iter()
            .find(|encoding| token.eq_ignore_ascii_case(encoding.as_str()))
            .or_else(|| token.eq_ignore_ascii_case("x-gzip").then_some(Self::Gzip))
    }

    /// Picks the preferred encoding among those an `Accept-Encoding` value offers.
    ///
    /// Codings offered with `q=0` are refused.
    pub fn select(accept_encoding: &str) -> Option<Self> {
        let offered: Vec<Self> = accept_encoding
            .split(',')
            .filter_map(|item| {
                let mut params = item.split(';');
                let token = params.next()?.trim();
                let refused = params.any(|param| {
                    param.trim().strip_prefix("q=").is_some_and(|q| q.trim().parse::<f32>().is_ok_and(|q| q <= 0.0))
                });
                if refused { None } else { Self::from_token(token) }
            })
            .collect();

        Self::PREFERENCE.into_iter().find(|encoding| offered.contains(encoding))
    }
}

impl fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents different types of content encoding.
enum Encoder {
    /// Gzip encoding.
    Gzip(GzEncoder<Writer>),
    /// Deflate encoding.
    Deflate(ZlibEncoder<Writer>),
    /// Zstd encoding.
    Zstd(ZstdEncoder<'static, Writer>),
    /// Brotli encoding.
    Br(Box<brotli::CompressorWriter<Writer>>),
}

impl Encoder {
    fn new(encoding: ContentEncoding) -> io::Result<Self> {
        Ok(match encoding {
            ContentEncoding::Gzip => Self::Gzip(GzEncoder::new(Writer::new(), Compression::best())),
            ContentEncoding::Deflate => Self::Deflate(ZlibEncoder::new(Writer::new(), Compression::best())),
            ContentEncoding::Zstd => Self::Zstd(ZstdEncoder::new(Writer::new(), 6)?),
            ContentEncoding::Brotli => Self::Br(Box::new(brotli::CompressorWriter::new(
                Writer::new(),
                32 * 1024, // 32 KiB buffer
                3,         // BROTLI_PARAM_QUALITY
                22,        // BROTLI_PARAM_LGWIN
            ))),
        })
    }

    /// Writes data to the encoder.
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let result = match self {
            Self::Gzip(encoder) => encoder.write_all(data),
            Self::Deflate(encoder) => encoder.write_all(data),
            Self::Zstd(encoder) => encoder.write_all(data),
            Self::Br(encoder) => encoder.write_all(data),
        };
        if let Err(e) = &result {
            trace!(cause = %e, "error encoding data");
        }
        result
    }

    /// Takes the encoded data produced so far.
    fn take(&mut self) -> Bytes {
        match self {
            Self::Gzip(encoder) => encoder.get_mut().take(),
            Self::Deflate(encoder) => encoder.get_mut().take(),
            Self::Zstd(encoder) => encoder.get_mut().take(),
            Self::Br(encoder) => encoder.get_mut().take(),
        }
    }

    /// Finishes the encoding process and returns the remaining encoded data.
    fn finish(self) -> io::Result<Bytes> {
        let mut writer = match self {
            Self::Gzip(encoder) => encoder.finish()?,
            Self::Deflate(encoder) => encoder.finish()?,
            Self::Zstd(encoder) => encoder.finish()?,
            Self::Br(mut encoder) => {
                encoder.flush()?;
                encoder.into_inner()
            }
        };
        Ok(writer.take())
    }
}

/// A producer compressing what is written into it.
///
/// Bytes written with [`EncodingProducer::write`] go through the encoder and whatever
/// compressed output it yields is buffered for the chunked writer.
/// [`EncodingProducer::finish`] flushes the encoder trailer and ends the stream.
pub struct EncodingProducer {
    inner: StreamingProducer,
    encoding: ContentEncoding,
    encoder: Mutex<Option<Encoder>>,
}

impl fmt::Debug for EncodingProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodingProducer")
            .field("encoding", &self.encoding)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl EncodingProducer {
    pub fn new(encoding: ContentEncoding) -> io::Result<Self> {
        Ok(Self {
            inner: StreamingProducer::with_encoding(encoding.as_str()),
            encoding,
            encoder: Mutex::new(Some(Encoder::new(encoding)?)),
        })
    }

    /// A producer for the preferred encoding the client accepts, `None` if it accepts
    /// none of them.
    pub fn for_accept_encoding(accept_encoding: &str) -> io::Result<Option<Self>> {
        ContentEncoding::select(accept_encoding).map(Self::new).transpose()
    }

    pub fn content_encoding(&self) -> ContentEncoding {
        self.encoding
    }

    pub fn write(&self, data: impl AsRef<[u8]>) -> io::Result<()> {
        let mut encoder = self.encoder.lock();
        let Some(encoder) = encoder.as_mut() else {
            return Err(io::Error::other("encoding producer already finished"));
        };
        encoder.write(data.as_ref())?;
        self.inner.push(encoder.take());
        Ok(())
    }

    /// Completes the compressed stream. Further writes fail.
    pub fn finish(&self) -> io::Result<()> {
        let mut encoder = self.encoder.lock();
        match encoder.take() {
            Some(encoder) => self.seal(encoder.finish()),
            None => self.seal(Ok(Bytes::new())),
        }
    }

    /// Ends the inner stream whether or not the trailer could be produced, so the
    /// chunked writer is never left waiting.
    fn seal(&self, trailer: io::Result<Bytes>) -> io::Result<()> {
        let result = trailer.map(|trailer| self.inner.push(trailer));
        if let Err(e) = &result {
            warn!(encoding = %self.encoding, cause = %e, "failed to finish compressed stream");
        }
        self.inner.finish();
        result
    }

    pub fn on_finish(&self, callback: impl FnOnce(Option<io::Error>) + Send + 'static) {
        self.inner.on_finish(callback);
    }

    pub fn on_write_error(&self, callback: impl Fn(&io::Error) + Send + Sync + 'static) {
        self.inner.on_write_error(callback);
    }
}

impl Producer for EncodingProducer {
    fn encoding(&self) -> &str {
        self.inner.encoding()
    }

    fn available(&self) -> usize {
        self.inner.available()
    }

    fn buffer_locked_do(&self, f: &mut dyn FnMut(&[u8])) {
        self.inner.buffer_locked_do(f);
    }

    fn complete(&self) -> bool {
        self.inner.complete()
    }

    fn has_consumed(&self, amount: usize) {
        self.inner.has_consumed(amount);
    }

    fn on_error(&self, error: &io::Error) {
        self.inner.on_error(error);
    }

    fn set_on_produce_cb(&self, callback: ProduceCallback) {
        self.inner.set_on_produce_cb(callback);
    }

    fn start_production(&self) {
        self.inner.start_production();
    }

    fn end_production(&self, error: Option<io::Error>) {
        self.encoder.lock().take();
        self.inner.end_production(error);
    }
}
