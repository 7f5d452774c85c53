//! HTTP/1.1 framing
//!
//! Just enough of the protocol for the board: one request per connection
//! (`Connection: close`), JSON bodies, and chunked transfer decoding for
//! store responses. Sockets and TLS stay on the board side; everything here
//! works on byte slices.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use hal_abstractions::{Method, Response};

use crate::api::{ApiResponse, CONTENT_TYPE_JSON};
use crate::status::FIRMWARE_VERSION;

/// Largest request head the local server accepts
pub const MAX_HEAD_LEN: usize = 1024;

/// Largest request body the local server accepts
pub const MAX_BODY_LEN: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HttpError {
    InvalidUrl,
    Malformed,
    UnsupportedMethod,
    TooLarge,
    InvalidUtf8,
}

impl core::fmt::Display for HttpError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidUrl => write!(f, "Invalid URL"),
            Self::Malformed => write!(f, "Malformed HTTP message"),
            Self::UnsupportedMethod => write!(f, "Unsupported method"),
            Self::TooLarge => write!(f, "HTTP message too large"),
            Self::InvalidUtf8 => write!(f, "Body is not UTF-8"),
        }
    }
}

impl core::error::Error for HttpError {}

/// `http[s]://host[:port][/target]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Url<'a> {
    pub tls: bool,
    pub host: &'a str,
    pub port: u16,
    /// Path and query, always starting with `/`
    pub target: &'a str,
}

impl<'a> Url<'a> {
    pub fn parse(url: &'a str) -> Result<Self, HttpError> {
        let (tls, rest) = if let Some(rest) = url.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            (false, rest)
        } else {
            return Err(HttpError::InvalidUrl);
        };

        let (authority, target) = match rest.find(['/', '?']) {
            Some(i) if rest.as_bytes()[i] == b'/' => (&rest[..i], &rest[i..]),
            Some(_) => return Err(HttpError::InvalidUrl),
            None => (rest, "/"),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (
                host,
                port.parse::<u16>().map_err(|_| HttpError::InvalidUrl)?,
            ),
            None => (authority, if tls { 443 } else { 80 }),
        };
        if host.is_empty() {
            return Err(HttpError::InvalidUrl);
        }

        Ok(Self {
            tls,
            host,
            port,
            target,
        })
    }
}

/// Request head and body for a client call
pub fn encode_request(method: Method, url: &Url<'_>, body: Option<&str>) -> String {
    let mut out = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: dispenser/{}\r\nAccept: application/json\r\nConnection: close\r\n",
        method, url.target, url.host, FIRMWARE_VERSION
    );
    match body {
        Some(body) => {
            out.push_str(&format!(
                "Content-Type: {}\r\nContent-Length: {}\r\n\r\n",
                CONTENT_TYPE_JSON,
                body.len()
            ));
            out.push_str(body);
        }
        None if matches!(method, Method::Put | Method::Post) => {
            out.push_str("Content-Length: 0\r\n\r\n");
        }
        None => out.push_str("\r\n"),
    }
    out
}

/// Parse a complete response read until the peer closed the connection
pub fn parse_response(raw: &[u8]) -> Result<Response, HttpError> {
    let head_end = find(raw, b"\r\n\r\n").ok_or(HttpError::Malformed)?;
    let head = core::str::from_utf8(&raw[..head_end]).map_err(|_| HttpError::Malformed)?;
    let payload = &raw[head_end + 4..];

    let mut lines = head.split("\r\n");
    let status_line = lines.next().ok_or(HttpError::Malformed)?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/1.") {
        return Err(HttpError::Malformed);
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or(HttpError::Malformed)?;

    let mut chunked = false;
    let mut content_length = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("transfer-encoding") {
            chunked = value.eq_ignore_ascii_case("chunked");
        } else if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().ok();
        }
    }

    let body = if chunked {
        decode_chunked(payload)?
    } else {
        let len = content_length.unwrap_or(payload.len()).min(payload.len());
        payload[..len].to_vec()
    };
    let body = String::from_utf8(body).map_err(|_| HttpError::InvalidUtf8)?;
    Ok(Response { status, body })
}

/// Whether `raw` already holds a whole response, so the reader can stop
/// without waiting for the peer to close
pub fn response_complete(raw: &[u8]) -> bool {
    let Some(head_end) = find(raw, b"\r\n\r\n") else {
        return false;
    };
    let Ok(head) = core::str::from_utf8(&raw[..head_end]) else {
        return false;
    };
    let body = &raw[head_end + 4..];
    for line in head.split("\r\n").skip(1) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            return value.parse::<usize>().is_ok_and(|len| body.len() >= len);
        }
        if name.eq_ignore_ascii_case("transfer-encoding") && value.eq_ignore_ascii_case("chunked") {
            return body.ends_with(b"0\r\n\r\n");
        }
    }
    false
}

fn decode_chunked(mut payload: &[u8]) -> Result<Vec<u8>, HttpError> {
    let mut body = Vec::new();
    loop {
        let line_end = find(payload, b"\r\n").ok_or(HttpError::Malformed)?;
        let size_line = core::str::from_utf8(&payload[..line_end]).map_err(|_| HttpError::Malformed)?;
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16).map_err(|_| HttpError::Malformed)?;
        payload = &payload[line_end + 2..];
        if size == 0 {
            return Ok(body);
        }
        if payload.len() < size {
            return Err(HttpError::Malformed);
        }
        body.extend_from_slice(&payload[..size]);
        payload = payload[size..].strip_prefix(b"\r\n").ok_or(HttpError::Malformed)?;
    }
}

/// A request received by the local API server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingRequest<'a> {
    pub method: Method,
    pub target: &'a str,
    /// `X-API-Key` header, else the `key` query parameter
    pub api_key: Option<&'a str>,
    pub body: &'a str,
}

/// Parse what has been received so far. `Ok(None)` means more bytes are
/// needed.
pub fn parse_request(raw: &[u8]) -> Result<Option<IncomingRequest<'_>>, HttpError> {
    let Some(head_end) = find(raw, b"\r\n\r\n") else {
        return if raw.len() > MAX_HEAD_LEN {
            Err(HttpError::TooLarge)
        } else {
            Ok(None)
        };
    };
    let head = core::str::from_utf8(&raw[..head_end]).map_err(|_| HttpError::Malformed)?;

    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or(HttpError::Malformed)?;
    let mut parts = request_line.split(' ');
    let method = parts.next().ok_or(HttpError::Malformed)?;
    let method = Method::parse(method).ok_or(HttpError::UnsupportedMethod)?;
    let target = parts.next().ok_or(HttpError::Malformed)?;
    if !parts.next().is_some_and(|v| v.starts_with("HTTP/1.")) {
        return Err(HttpError::Malformed);
    }

    let mut content_length = 0;
    let mut header_key = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(HttpError::Malformed);
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|_| HttpError::Malformed)?;
        } else if name.eq_ignore_ascii_case("x-api-key") {
            header_key = Some(value);
        }
    }
    if content_length > MAX_BODY_LEN {
        return Err(HttpError::TooLarge);
    }

    let body_start = head_end + 4;
    if raw.len() < body_start + content_length {
        return Ok(None);
    }
    let body = core::str::from_utf8(&raw[body_start..body_start + content_length])
        .map_err(|_| HttpError::InvalidUtf8)?;

    Ok(Some(IncomingRequest {
        method,
        target,
        api_key: header_key.or_else(|| query_param(target, "key")),
        body,
    }))
}

/// Value of `name` in the query string of `target`
pub fn query_param<'a>(target: &'a str, name: &str) -> Option<&'a str> {
    let (_, query) = target.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        (k == name).then_some(v)
    })
}

/// Response head and body for the local API server
pub fn encode_response(response: &ApiResponse) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n{}",
        response.status,
        response.reason(),
        CONTENT_TYPE_JSON,
        response.body.len(),
        response.body
    )
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
