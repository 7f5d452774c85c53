//! Remote store error types

/// Why a remote store call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// Connection, TLS or timeout failure before a status line arrived
    Transport,
    /// HTTP 429
    RateLimited,
    /// HTTP 401
    Unauthorized,
    /// HTTP 403
    Forbidden,
    /// Any other non-success status
    Status(u16),
    /// Response body was not the expected JSON
    Parse,
    /// Local value could not be encoded
    Serialize,
}

impl StoreError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            429 => Self::RateLimited,
            other => Self::Status(other),
        }
    }

    /// Whether another attempt can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport | Self::RateLimited | Self::Status(_))
    }

    /// Credential problems and local encode/decode failures end the call
    pub fn is_terminal(&self) -> bool {
        !self.is_retryable()
    }

    /// HTTP status behind the error, if there was one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RateLimited => Some(429),
            Self::Unauthorized => Some(401),
            Self::Forbidden => Some(403),
            Self::Status(code) => Some(*code),
            Self::Transport | Self::Parse | Self::Serialize => None,
        }
    }
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Transport => write!(f, "Transport error"),
            Self::RateLimited => write!(f, "Rate limited (429)"),
            Self::Unauthorized => write!(f, "Unauthorized (401)"),
            Self::Forbidden => write!(f, "Forbidden (403)"),
            Self::Status(code) => write!(f, "HTTP status {}", code),
            Self::Parse => write!(f, "JSON parse error"),
            Self::Serialize => write!(f, "JSON serialize error"),
        }
    }
}

impl core::error::Error for StoreError {}

/// Short label for a transport error category
pub(crate) fn kind_label(kind: embedded_io::ErrorKind) -> &'static str {
    use embedded_io::ErrorKind;
    match kind {
        ErrorKind::TimedOut => "timed out",
        ErrorKind::ConnectionRefused => "connection refused",
        ErrorKind::ConnectionReset => "connection reset",
        ErrorKind::ConnectionAborted => "connection aborted",
        ErrorKind::NotConnected => "not connected",
        ErrorKind::BrokenPipe => "broken pipe",
        ErrorKind::InvalidData => "invalid data",
        ErrorKind::OutOfMemory => "out of memory",
        _ => "other",
    }
}
