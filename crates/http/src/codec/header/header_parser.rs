//! Incremental HTTP request header parser.
//!
//! The parser is a pure state machine with no I/O. Bytes are handed over with
//! [`RequestParser::feed`] as they arrive from the transport, in chunks of any size.
//! The parser advances through its states as far as the buffered bytes allow:
//!
//! ```text
//! Verb -> Url -> ProtocolVersion -> ProtocolVersionTrailer -> Fields -> Body
//! ```
//!
//! There are no backward transitions. Once the empty line ending the header section
//! is seen the parser stays in `Body` and every byte after that line is kept as
//! leftover for the body reader.
//!
//! # Limits
//!
//! Before each append the parser checks the total number of header bytes against
//! [`MAX_HEADER_BYTES`] (or the configured limit), and before each field it checks the
//! field count against [`MAX_HEADER_FIELDS`]. Both fail with
//! [`ParseError::HeaderLimitExceeded`].

use crate::ensure;
use crate::protocol::{ParseError, RequestHeaderIntermediate};
use bytes::{Buf, BytesMut};
use tracing::trace;

/// Default upper bound of the header section in bytes
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Default upper bound of header fields per request
pub const MAX_HEADER_FIELDS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ParseState {
    Verb,
    Url,
    ProtocolVersion,
    ProtocolVersionTrailer,
    Fields,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseProgress {
    /// A token is incomplete, another read is required.
    NeedMoreData,
    /// The header section is complete.
    Finished,
}

#[derive(Debug)]
pub struct RequestParser {
    state: ParseState,
    buffer: BytesMut,
    consumed: usize,
    field_count: usize,
    header: RequestHeaderIntermediate,
    max_header_bytes: usize,
    max_header_fields: usize,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self::with_limits(MAX_HEADER_BYTES, MAX_HEADER_FIELDS)
    }

    pub fn with_limits(max_header_bytes: usize, max_header_fields: usize) -> Self {
        Self {
            state: ParseState::Verb,
            buffer: BytesMut::new(),
            consumed: 0,
            field_count: 0,
            header: RequestHeaderIntermediate::default(),
            max_header_bytes,
            max_header_fields,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == ParseState::Body
    }

    /// The header as parsed so far.
    pub fn header(&self) -> &RequestHeaderIntermediate {
        &self.header
    }

    /// Bytes buffered after the end of the header section.
    ///
    /// Only meaningful once the parser has finished, before that it holds the
    /// unparsed remainder of the header.
    pub fn leftover(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the parser, returning the header and the leftover body bytes.
    pub fn into_parts(self) -> (RequestHeaderIntermediate, BytesMut) {
        (self.header, self.buffer)
    }

    /// Appends `bytes` and advances the state machine as far as possible.
    ///
    /// Bytes fed after the header finished are appended to the leftover without any
    /// limit checks.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<ParseProgress, ParseError> {
        if self.is_finished() {
            self.buffer.extend_from_slice(bytes);
            return Ok(ParseProgress::Finished);
        }

        let size = self.consumed + self.buffer.len() + bytes.len();
        ensure!(size <= self.max_header_bytes, ParseError::too_large_header(size, self.max_header_bytes));
        self.buffer.extend_from_slice(bytes);

        loop {
            match self.state {
                ParseState::Verb => {
                    let Some(method) = self.next_word("method")? else {
                        return Ok(ParseProgress::NeedMoreData);
                    };
                    self.header.method = method;
                    self.advance(ParseState::Url);
                }
                ParseState::Url => {
                    let Some(url) = self.next_word("request target")? else {
                        return Ok(ParseProgress::NeedMoreData);
                    };
                    self.header.url = url;
                    self.advance(ParseState::ProtocolVersion);
                }
                ParseState::ProtocolVersion => {
                    let Some(protocol) = self.next_protocol()? else {
                        return Ok(ParseProgress::NeedMoreData);
                    };
                    self.header.protocol = protocol;
                    self.advance(ParseState::ProtocolVersionTrailer);
                }
                ParseState::ProtocolVersionTrailer => {
                    let Some(version) = self.next_line()? else {
                        return Ok(ParseProgress::NeedMoreData);
                    };
                    let version = version.trim();
                    ensure!(!version.is_empty(), ParseError::protocol("missing protocol version"));
                    ensure!(
                        !version.contains(|c: char| c.is_ascii_whitespace()),
                        ParseError::protocol(format!("more tokens than expected in request line: {version:?}"))
                    );
                    self.header.version = version.to_owned();
                    self.advance(ParseState::Fields);
                }
                ParseState::Fields => {
                    let Some(line) = self.next_line()? else {
                        return Ok(ParseProgress::NeedMoreData);
                    };
                    if line.is_empty() {
                        self.advance(ParseState::Body);
                        return Ok(ParseProgress::Finished);
                    }
                    self.parse_field(&line)?;
                }
                ParseState::Body => return Ok(ParseProgress::Finished),
            }
        }
    }

    fn advance(&mut self, next: ParseState) {
        trace!(from = ?self.state, to = ?next, "header parser state change");
        self.state = next;
    }

    fn parse_field(&mut self, line: &str) -> Result<(), ParseError> {
        ensure!(
            self.field_count < self.max_header_fields,
            ParseError::too_many_headers(self.max_header_fields)
        );
        ensure!(
            line.starts_with(|c: char| c.is_ascii_alphanumeric()),
            ParseError::protocol(format!("header field must start with an alphanumeric character: {line:?}"))
        );

        let Some((name, value)) = line.split_once(':') else {
            return Err(ParseError::protocol(format!("header field without colon: {line:?}")));
        };
        let name = name.trim_end();
        let value = value.trim();

        self.field_count += 1;
        if name.eq_ignore_ascii_case("cookie") {
            self.header.add_cookies(value);
        } else {
            self.header.fields.insert(name.to_owned(), value.to_owned());
        }
        Ok(())
    }

    /// A space delimited token of the request line.
    fn next_word(&mut self, what: &str) -> Result<Option<String>, ParseError> {
        let Some(end) = self.buffer.iter().position(|&b| b == b' ' || b == b'\n') else {
            return Ok(None);
        };
        ensure!(self.buffer[end] == b' ', ParseError::protocol(format!("request line ended before the {what}")));
        ensure!(end > 0, ParseError::protocol(format!("empty {what}")));

        let word = self.take(end, 1);
        String::from_utf8(word).map(Some).map_err(ParseError::protocol)
    }

    /// The protocol name, everything up to the `/` before the version.
    fn next_protocol(&mut self) -> Result<Option<String>, ParseError> {
        let Some(end) = self.buffer.iter().position(|&b| b == b'/' || b == b'\n') else {
            return Ok(None);
        };
        ensure!(self.buffer[end] == b'/', ParseError::protocol("protocol token is missing '/'"));

        let protocol = self.take(end, 1);
        String::from_utf8(protocol).map(Some).map_err(ParseError::protocol)
    }

    /// The next line without its terminator. A bare `\n` is accepted as well as `\r\n`.
    fn next_line(&mut self) -> Result<Option<String>, ParseError> {
        let Some(end) = self.buffer.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let mut line = self.take(end, 1);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }

    fn take(&mut self, len: usize, delimiter: usize) -> Vec<u8> {
        let token = self.buffer.split_to(len).to_vec();
        self.buffer.advance(delimiter);
        self.consumed += len + delimiter;
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn crlf(str: &str) -> String {
        str.replace('\n', "\r\n")
    }

    #[test]
    fn from_curl() {
        let str = crlf(indoc! {r##"
        GET /index.html?x=%20 HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##});

        let mut parser = RequestParser::new();
        assert_eq!(parser.feed(str.as_bytes()).unwrap(), ParseProgress::Finished);

        let header = parser.header();
        assert_eq!(header.method, "GET");
        assert_eq!(header.url, "/index.html?x=%20");
        assert_eq!(header.protocol, "HTTP");
        assert_eq!(header.version, "1.1");
        assert_eq!(header.fields.len(), 3);
        assert_eq!(header.fields.get("Host").map(String::as_str), Some("127.0.0.1:8080"));
        assert_eq!(header.fields.get("Accept").map(String::as_str), Some("*/*"));
        assert!(parser.leftover().is_empty());
    }

    #[test]
    fn from_edge() {
        let str = crlf(indoc! {r##"
        POST /upload HTTP/1.1
        Host: 127.0.0.1:8080
        Connection: keep-alive
        Content-Length: 11
        Cookie: a=1; b=2
        sec-ch-ua-platform: "macOS"
        Accept-Language: zh-CN,zh;q=0.9,en;q=0.8

        hello world"##});

        let mut parser = RequestParser::new();
        assert_eq!(parser.feed(str.as_bytes()).unwrap(), ParseProgress::Finished);

        let (header, leftover) = parser.into_parts();
        assert_eq!(header.method, "POST");
        assert_eq!(header.cookies.get("a").map(String::as_str), Some("1"));
        assert_eq!(header.cookies.get("b").map(String::as_str), Some("2"));
        assert!(!header.fields.contains_key("Cookie"));
        assert_eq!(header.fields.get("sec-ch-ua-platform").map(String::as_str), Some("\"macOS\""));
        assert_eq!(&leftover[..], b"hello world");
    }

    #[test]
    fn chunk_size_does_not_matter() {
        let str = crlf(indoc! {r##"
        PUT /files/a%2Fb HTTP/1.0
        Host: localhost
        Cookie: session=abc
        Content-Length: 4

        body"##});

        let mut whole = RequestParser::new();
        whole.feed(str.as_bytes()).unwrap();

        let mut single = RequestParser::new();
        let mut progress = ParseProgress::NeedMoreData;
        for byte in str.as_bytes() {
            progress = single.feed(std::slice::from_ref(byte)).unwrap();
        }

        assert_eq!(progress, ParseProgress::Finished);
        assert_eq!(whole.header(), single.header());
        assert_eq!(whole.leftover(), single.leftover());
        assert_eq!(single.leftover(), b"body");
    }

    #[test]
    fn need_more_data_until_empty_line() {
        let mut parser = RequestParser::new();

        assert_eq!(parser.feed(b"GET / HT").unwrap(), ParseProgress::NeedMoreData);
        assert_eq!(parser.state(), ParseState::ProtocolVersion);

        assert_eq!(parser.feed(b"TP/1.1\r\nHost: x\r").unwrap(), ParseProgress::NeedMoreData);
        assert_eq!(parser.state(), ParseState::Fields);

        assert_eq!(parser.feed(b"\n\r\n").unwrap(), ParseProgress::Finished);
        assert!(parser.is_finished());
    }

    #[test]
    fn latest_field_value_wins() {
        let mut parser = RequestParser::new();
        parser.feed(b"GET / HTTP/1.1\r\nX-Id: 1\r\nX-Id: 2\r\n\r\n").unwrap();

        assert_eq!(parser.header().fields.get("X-Id").map(String::as_str), Some("2"));
    }

    #[test]
    fn missing_slash_in_protocol() {
        let mut parser = RequestParser::new();
        let result = parser.feed(b"GET / HTTP1.1\r\n\r\n");

        assert!(matches!(result, Err(ParseError::Protocol { .. })));
    }

    #[test]
    fn extra_tokens_after_version() {
        let mut parser = RequestParser::new();
        let result = parser.feed(b"GET / HTTP/1.1 extra tokens\r\n\r\n");

        assert!(matches!(result, Err(ParseError::Protocol { .. })));
    }

    #[test]
    fn trailing_space_after_version() {
        let mut parser = RequestParser::new();
        let result = parser.feed(b"GET / HTTP/1.1 \r\n\r\n");

        assert_eq!(result.unwrap(), ParseProgress::Finished);
        assert_eq!(parser.header().version, "1.1");
    }

    #[test]
    fn field_with_leading_symbol() {
        let mut parser = RequestParser::new();
        let result = parser.feed(b"GET / HTTP/1.1\r\n Host: x\r\n\r\n");

        assert!(matches!(result, Err(ParseError::Protocol { .. })));
    }

    #[test]
    fn field_without_colon() {
        let mut parser = RequestParser::new();
        let result = parser.feed(b"GET / HTTP/1.1\r\nHost x\r\n\r\n");

        assert!(matches!(result, Err(ParseError::Protocol { .. })));
    }

    #[test]
    fn request_line_without_target() {
        let mut parser = RequestParser::new();
        let result = parser.feed(b"GET\r\n\r\n");

        assert!(matches!(result, Err(ParseError::Protocol { .. })));
    }

    #[test]
    fn header_buffer_limit() {
        let mut parser = RequestParser::with_limits(32, MAX_HEADER_FIELDS);
        assert_eq!(parser.feed(b"GET / HTTP/1.1\r\n").unwrap(), ParseProgress::NeedMoreData);

        let result = parser.feed(b"Host: a-perfectly-valid-host\r\n\r\n");
        assert!(matches!(result, Err(ParseError::HeaderLimitExceeded { .. })));
    }

    #[test]
    fn header_field_limit() {
        let mut parser = RequestParser::with_limits(MAX_HEADER_BYTES, 2);
        let result = parser.feed(b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n");

        assert!(matches!(result, Err(ParseError::HeaderLimitExceeded { .. })));
    }

    #[test]
    fn bytes_after_finish_are_kept() {
        let mut parser = RequestParser::with_limits(24, MAX_HEADER_FIELDS);
        parser.feed(b"GET / HTTP/1.1\r\n\r\nab").unwrap();
        assert_eq!(parser.feed(b"cdefghijklmnopqrstuvwxyz").unwrap(), ParseProgress::Finished);

        assert_eq!(parser.leftover(), b"abcdefghijklmnopqrstuvwxyz");
    }
}
