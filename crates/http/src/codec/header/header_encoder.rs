//! Serializes a [`ResponseHeader`] into its wire form.
//!
//! The output is the status line, one line per header field, one `Set-Cookie` line per
//! outgoing cookie and the empty line closing the header section.

use crate::ensure;
use crate::protocol::{ResponseHeader, SendError};

use bytes::{BufMut, BytesMut};
use http::{HeaderName, HeaderValue};

use std::io;
use std::io::Write;
use tokio_util::codec::Encoder;

/// Initial buffer size allocated for header serialization
const INIT_HEADER_SIZE: usize = 1024;

/// Encoder for response headers implementing the [`Encoder`] trait.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderEncoder;

impl Encoder<&ResponseHeader> for HeaderEncoder {
    type Error = SendError;

    fn encode(&mut self, header: &ResponseHeader, dst: &mut BytesMut) -> Result<(), Self::Error> {
        ensure!(
            !header.message().contains(['\r', '\n']),
            SendError::invalid_header(format!("status message {:?}", header.message()))
        );
        let cookies = header.cookies().iter().map(ToString::to_string).collect::<Vec<_>>();
        for (name, value) in header.fields() {
            check_field(name, value)?;
        }
        for cookie in &cookies {
            check_field("Set-Cookie", cookie)?;
        }

        dst.reserve(INIT_HEADER_SIZE);
        write!(
            FastWrite(dst),
            "{}/{} {} {}\r\n",
            header.protocol(),
            header.version(),
            header.code(),
            header.message()
        )?;

        for (name, value) in header.fields() {
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }

        for cookie in &cookies {
            dst.put_slice(b"Set-Cookie: ");
            dst.put_slice(cookie.as_bytes());
            dst.put_slice(b"\r\n");
        }

        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// Rejects names that are not tokens and values carrying control characters, so no
/// field can end the header line early.
fn check_field(name: &str, value: &str) -> Result<(), SendError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| SendError::invalid_header(format!("field name {name:?}: {e}")))?;
    HeaderValue::from_bytes(value.as_bytes())
        .map_err(|e| SendError::invalid_header(format!("value of {name}: {e}")))?;
    Ok(())
}

/// Fast writer implementation for writing to `BytesMut`.
struct FastWrite<'a>(&'a mut BytesMut);

impl Write for FastWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Cookie;
    use indoc::indoc;

    #[test]
    fn encodes_status_fields_and_cookies() {
        let mut header = ResponseHeader::new();
        header.set_code(200).set_field("Content-Type", "text/plain").set_field("Content-Length", "5");
        header.add_cookie(Cookie::new("session", "abc").path("/"));

        let mut dst = BytesMut::new();
        HeaderEncoder.encode(&header, &mut dst).unwrap();

        let expected = indoc! {"
            HTTP/1.1 200 OK
            Content-Type: text/plain
            Content-Length: 5
            Set-Cookie: session=abc; Path=/

        "}
        .replace('\n', "\r\n");
        assert_eq!(std::str::from_utf8(&dst).unwrap(), expected);
    }

    #[test]
    fn message_override() {
        let mut header = ResponseHeader::new();
        header.set_code(418).set_message("Short And Stout");

        let mut dst = BytesMut::new();
        HeaderEncoder.encode(&header, &mut dst).unwrap();

        assert_eq!(&dst[..], b"HTTP/1.1 418 Short And Stout\r\n\r\n");
    }

    #[test]
    fn line_breaks_in_fields_are_rejected() {
        let mut header = ResponseHeader::new();
        header.set_code(302).set_field("Location", "/next\r\nSet-Cookie: admin=1");

        let mut dst = BytesMut::new();
        let err = HeaderEncoder.encode(&header, &mut dst).unwrap_err();

        assert!(matches!(err, SendError::InvalidHeader { .. }));
        assert!(dst.is_empty());
    }

    #[test]
    fn line_breaks_in_names_and_cookies_are_rejected() {
        let mut header = ResponseHeader::new();
        header.set_field("X-Split\r\nEvil", "1");
        assert!(matches!(HeaderEncoder.encode(&header, &mut BytesMut::new()), Err(SendError::InvalidHeader { .. })));

        let mut header = ResponseHeader::new();
        header.add_cookie(Cookie::new("session", "abc\r\nX-Evil: 1"));
        assert!(matches!(HeaderEncoder.encode(&header, &mut BytesMut::new()), Err(SendError::InvalidHeader { .. })));

        let mut header = ResponseHeader::new();
        header.set_code(200).set_message("OK\r\nX-Evil: 1");
        assert!(matches!(HeaderEncoder.encode(&header, &mut BytesMut::new()), Err(SendError::InvalidHeader { .. })));
    }
}
