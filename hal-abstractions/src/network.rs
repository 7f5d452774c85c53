//! HTTP transport abstraction
//!
//! The pipeline only needs "send one request, get status and body back".
//! Connection handling (DNS, TCP, TLS, keep-alive) is the transport's job.

use alloc::string::String;
use core::future::Future;

/// HTTP verbs used against the remote document store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }

    /// Parse a request-line verb (exact, upper case)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Self::Get),
            "PUT" => Some(Self::Put),
            "POST" => Some(Self::Post),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl core::fmt::Display for Method {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single outbound request
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub method: Method,
    /// Absolute URL including scheme, host and query
    pub url: &'a str,
    /// JSON body for PUT/POST
    pub body: Option<&'a str>,
    /// Whole-exchange timeout
    pub timeout_ms: u32,
}

/// Status line and body of a completed exchange
///
/// Any HTTP status is a successful *transport* result; interpreting the
/// status is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// One-shot HTTP client
///
/// Errors are transport failures only (DNS, connect, TLS, timeout, malformed
/// response). They carry an [`embedded_io::ErrorKind`] so callers can log a
/// category without knowing the concrete type.
pub trait HttpTransport {
    type Error: embedded_io::Error;

    fn send(
        &mut self,
        request: Request<'_>,
    ) -> impl Future<Output = Result<Response, Self::Error>>;
}
