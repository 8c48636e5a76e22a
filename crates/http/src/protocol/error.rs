use http::StatusCode;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    #[error("connection error: {source}")]
    ConnectionError {
        #[from]
        source: ConnectionError,
    },

    #[error("body error: {source}")]
    BodyError {
        #[from]
        source: BodyError,
    },

    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },
}

impl HttpError {
    /// True when the underlying cause is an intentional cancellation.
    pub fn is_aborted(&self) -> bool {
        match self {
            Self::RequestError { .. } => false,
            Self::ConnectionError { source } => source.is_aborted(),
            Self::BodyError { source } => source.is_aborted(),
            Self::ResponseError { source } => source.is_aborted(),
        }
    }
}

/// Errors raised while turning raw bytes into a request header.
#[derive(Error, Debug)]
pub enum ParseError {
    /// Malformed request line or header field.
    #[error("protocol error: {reason}")]
    Protocol { reason: String },

    /// A resource guard tripped, the header may still have been syntactically valid.
    #[error("header limit exceeded: {reason}")]
    HeaderLimitExceeded { reason: String },
}

impl ParseError {
    pub fn protocol<S: ToString>(str: S) -> Self {
        Self::Protocol { reason: str.to_string() }
    }

    pub fn too_large_header(current_size: usize, max_size: usize) -> Self {
        Self::HeaderLimitExceeded {
            reason: format!("header size {current_size} exceeds the limit {max_size}"),
        }
    }

    pub fn too_many_headers(max_num: usize) -> Self {
        Self::HeaderLimitExceeded { reason: format!("header field count exceeds the limit {max_num}") }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

/// Transport level failures surfaced by a connection.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("connection closed by peer")]
    Closed,

    #[error("operation aborted")]
    Aborted,

    #[error("read timed out")]
    TimedOut,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ConnectionError {
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// An `io::Error` describing this failure, for callbacks that speak `io::Error`.
    pub fn to_io_error(&self) -> io::Error {
        match self {
            Self::Closed => io::Error::from(io::ErrorKind::UnexpectedEof),
            Self::Aborted => io::Error::from(io::ErrorKind::ConnectionReset),
            Self::TimedOut => io::Error::from(io::ErrorKind::TimedOut),
            Self::Io { source } => io::Error::new(source.kind(), source.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum BodyError {
    #[error("content-length is missing or invalid")]
    LengthRequired,

    #[error("body read failed: {source}")]
    Connection {
        #[from]
        source: ConnectionError,
    },

    #[error("body sink failed: {source}")]
    Sink { source: io::Error },
}

impl BodyError {
    pub fn sink<E: Into<io::Error>>(e: E) -> Self {
        Self::Sink { source: e.into() }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Connection { source } if source.is_aborted())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::LengthRequired => StatusCode::LENGTH_REQUIRED,
            Self::Connection { .. } | Self::Sink { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Error, Debug)]
pub enum SendError {
    #[error("response already concluded")]
    Concluded,

    /// A header field or cookie would break the header framing.
    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("write failed: {source}")]
    Connection {
        #[from]
        source: ConnectionError,
    },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Connection { source } if source.is_aborted())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_is_detected_through_wrappers() {
        let err: HttpError = BodyError::from(ConnectionError::Aborted).into();
        assert!(err.is_aborted());

        let err: HttpError = SendError::from(ConnectionError::TimedOut).into();
        assert!(!err.is_aborted());
    }

    #[test]
    fn body_error_status() {
        assert_eq!(BodyError::LengthRequired.status_code(), StatusCode::LENGTH_REQUIRED);
        assert_eq!(ParseError::too_many_headers(3).status_code(), StatusCode::BAD_REQUEST);
    }
}
