//! Core HTTP protocol types.
//!
//! This module holds the data model shared by the parser, the connection and the
//! request/response facades.
//!
//! - **Request Header** ([`request`]): [`RequestHeaderIntermediate`] as filled in by the
//!   parser, and the frozen [`RequestHeader`] with decoded path and query parameters
//! - **Response Header** ([`response`]): [`ResponseHeader`] with status, fields and
//!   outgoing cookies, plus the [`status_message`] lookup
//! - **Cookies** ([`cookie`]): the [`Cookie`] value written on `Set-Cookie` lines
//! - **Error Handling** ([`error`]):
//!   - [`HttpError`]: Top-level error type
//!   - [`ParseError`]: Request header parsing errors
//!   - [`ConnectionError`]: Transport failures, including cancellation and timeouts
//!   - [`BodyError`]: Request body reading errors
//!   - [`SendError`]: Response sending errors

mod request;
pub use request::RequestHeader;
pub use request::RequestHeaderIntermediate;

mod response;
pub use response::ResponseHeader;
pub use response::status_message;

mod cookie;
pub use cookie::Cookie;
pub use cookie::SameSite;

mod error;
pub use error::BodyError;
pub use error::ConnectionError;
pub use error::HttpError;
pub use error::ParseError;
pub use error::SendError;
