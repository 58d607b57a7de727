use std::fmt;

/// Closed set of failure categories surfaced by this crate.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// The TCP/TLS connection could not be established in time.
    ConnectionTimeout,
    /// The request was sent but no response headers arrived in time.
    SendTimeout,
    /// The response body (or an SSE chunk) did not arrive in time.
    ReceiveTimeout,
    /// HTTP 400.
    BadRequest,
    /// HTTP 401.
    Unauthorized,
    /// HTTP 403.
    Forbidden,
    /// HTTP 404.
    NotFound,
    /// HTTP 5xx.
    ServerError,
    /// DNS failure, refused or unreachable host.
    NoConnection,
    /// The caller cancelled the request.
    Cancelled,
    /// Anything else, including unmapped status codes.
    Unknown,
}

impl ErrorKind {
    /// Whether a request failing with this kind may succeed when re-issued.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout
                | Self::SendTimeout
                | Self::ReceiveTimeout
                | Self::ServerError
                | Self::NoConnection
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionTimeout => "connection_timeout",
            Self::SendTimeout => "send_timeout",
            Self::ReceiveTimeout => "receive_timeout",
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::ServerError => "server_error",
            Self::NoConnection => "no_connection",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Message used when the server did not provide one.
    pub(crate) fn default_message(self) -> &'static str {
        match self {
            Self::ConnectionTimeout => "connection timed out",
            Self::SendTimeout => "request timed out waiting for a response",
            Self::ReceiveTimeout => "timed out receiving response data",
            Self::BadRequest => "bad request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "resource not found",
            Self::ServerError => "server error",
            Self::NoConnection => "no network connection",
            Self::Cancelled => "request cancelled",
            Self::Unknown => "unexpected error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type returned by this crate.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ApiError {
    kind: ErrorKind,
    message: String,
    status_code: Option<u16>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    /// Attaches the HTTP status that produced this error.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Uniform error handed to requests queued behind a failed token refresh.
    pub fn auth_failure() -> Self {
        Self::new(ErrorKind::Unauthorized, "authentication refresh failed").with_status(401)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, ErrorKind::Cancelled.default_message())
    }

    /// A success response whose body could not be decoded.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Short, user-facing text suitable for a toast or inline error.
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            ErrorKind::ConnectionTimeout | ErrorKind::SendTimeout | ErrorKind::ReceiveTimeout => {
                "The server is taking too long to respond. Please try again."
            }
            ErrorKind::NoConnection => "No internet connection. Check your network and try again.",
            ErrorKind::ServerError => "Something went wrong on our side. Please try again later.",
            ErrorKind::Unauthorized => "Your session has expired. Please sign in again.",
            ErrorKind::Forbidden => "You don't have permission to do that.",
            ErrorKind::NotFound => "We couldn't find what you were looking for.",
            ErrorKind::BadRequest => "The request was invalid.",
            ErrorKind::Cancelled => "The request was cancelled.",
            ErrorKind::Unknown => "Something unexpected happened.",
        }
    }
}
