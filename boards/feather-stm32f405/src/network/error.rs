#![deny(unsafe_code)]
//! Network error types

use defmt::Format;
use dispenser_core::http::HttpError;

/// Transport failures for SNTP, store and weather requests and the local
/// server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum NetworkError {
    /// W5500 did not come up
    EthernetInit,
    /// DNS resolution failed
    DnsError,
    /// Socket bind/connect/read/write error
    SocketError,
    /// Request timeout
    Timeout,
    /// Invalid response from server
    InvalidResponse,
    /// Server error (e.g., invalid stratum for NTP)
    ServerError,
    /// All configured servers failed
    AllServersFailed,
    /// RTC not initialized
    RtcNotInitialized,
    /// RTC hardware error
    RtcHardwareError,
    /// TLS handshake failed
    TlsHandshakeFailed,
    /// HTTPS requested but this client was built without TLS
    TlsUnavailable,
    /// URL could not be parsed
    InvalidUrl,
    /// Response did not fit the receive limit
    ResponseTooLarge,
}

impl core::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::EthernetInit => write!(f, "Ethernet init failed"),
            Self::DnsError => write!(f, "DNS resolution failed"),
            Self::SocketError => write!(f, "Socket error"),
            Self::Timeout => write!(f, "Request timeout"),
            Self::InvalidResponse => write!(f, "Invalid response"),
            Self::ServerError => write!(f, "Server error"),
            Self::AllServersFailed => write!(f, "All servers failed"),
            Self::RtcNotInitialized => write!(f, "RTC not initialized"),
            Self::RtcHardwareError => write!(f, "RTC hardware error"),
            Self::TlsHandshakeFailed => write!(f, "TLS handshake failed"),
            Self::TlsUnavailable => write!(f, "TLS not available"),
            Self::InvalidUrl => write!(f, "Invalid URL"),
            Self::ResponseTooLarge => write!(f, "Response too large"),
        }
    }
}

impl core::error::Error for NetworkError {}

impl embedded_io::Error for NetworkError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            Self::SocketError => embedded_io::ErrorKind::BrokenPipe,
            Self::Timeout => embedded_io::ErrorKind::TimedOut,
            Self::InvalidResponse | Self::ResponseTooLarge => embedded_io::ErrorKind::InvalidData,
            Self::InvalidUrl => embedded_io::ErrorKind::InvalidInput,
            Self::DnsError => embedded_io::ErrorKind::AddrNotAvailable,
            Self::TlsUnavailable => embedded_io::ErrorKind::Unsupported,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl From<HttpError> for NetworkError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::InvalidUrl => Self::InvalidUrl,
            HttpError::TooLarge => Self::ResponseTooLarge,
            _ => Self::InvalidResponse,
        }
    }
}
