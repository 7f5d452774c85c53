#![deny(unsafe_code)]
//! HTTP/1.1 client over embassy-net, with TLS 1.3 via embedded-tls
//!
//! One connection per request (`Connection: close`). Framing lives in
//! [`dispenser_core::http`]; this module only moves bytes.
//!
//! Server certificates are not verified (`NoVerify`).

use alloc::vec::Vec;

use defmt::{debug, error, Debug2Format};
use dispenser_core::http::{encode_request, parse_response, response_complete, Url};
use embassy_net::dns::DnsQueryType;
use embassy_net::{IpEndpoint, Stack};
use embassy_time::{with_timeout, Duration};
use embedded_io_async::{Read, Write};
use embedded_tls::{
    Aes128GcmSha256, CryptoProvider, NoVerify, TlsConfig, TlsConnection, TlsContext, TlsVerifier,
};
use hal_abstractions::{HttpTransport, Request, Response};

use crate::tls_buffers::TlsBuffers;

use super::error::NetworkError;
use super::socket::TcpConnection;

const TCP_RX_BUF: usize = 4096;
const TCP_TX_BUF: usize = 2048;

/// Responses larger than this are refused
const MAX_RESPONSE_LEN: usize = 12 * 1024;

/// Per read/write inactivity limit below the whole-exchange timeout
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Wraps an RNG for the TLS handshake
struct RngProvider<RNG> {
    rng: RNG,
    verifier: NoVerify,
}

impl<RNG> CryptoProvider for RngProvider<RNG>
where
    RNG: rand_core::CryptoRngCore,
{
    type CipherSuite = Aes128GcmSha256;
    type Signature = &'static [u8];

    fn rng(&mut self) -> impl rand_core::CryptoRngCore {
        &mut self.rng
    }

    fn verifier(
        &mut self,
    ) -> Result<&mut impl TlsVerifier<Self::CipherSuite>, embedded_tls::TlsError> {
        Ok(&mut self.verifier)
    }
}

/// Plain HTTP client
#[derive(Clone, Copy)]
pub struct HttpClient {
    stack: Stack<'static>,
}

impl HttpClient {
    pub fn new(stack: Stack<'static>) -> Self {
        Self { stack }
    }

    pub async fn exchange(&self, request: Request<'_>) -> Result<Response, NetworkError> {
        let url = Url::parse(request.url)?;
        if url.tls {
            return Err(NetworkError::TlsUnavailable);
        }
        with_timeout(
            Duration::from_millis(request.timeout_ms as u64),
            self.plain(&url, &request),
        )
        .await
        .map_err(|_| NetworkError::Timeout)?
    }

    async fn resolve(&self, url: &Url<'_>) -> Result<IpEndpoint, NetworkError> {
        let addr = self
            .stack
            .dns_query(url.host, DnsQueryType::A)
            .await
            .map_err(|e| {
                error!("DNS query for {} failed: {:?}", url.host, Debug2Format(&e));
                NetworkError::DnsError
            })?
            .first()
            .copied()
            .ok_or(NetworkError::DnsError)?;
        Ok(IpEndpoint::new(addr, url.port))
    }

    async fn plain(&self, url: &Url<'_>, request: &Request<'_>) -> Result<Response, NetworkError> {
        let endpoint = self.resolve(url).await?;
        let mut rx_buffer = [0u8; TCP_RX_BUF];
        let mut tx_buffer = [0u8; TCP_TX_BUF];
        let mut socket = TcpConnection::new(self.stack, &mut rx_buffer, &mut tx_buffer, IO_TIMEOUT);
        socket.connect(endpoint).await?;

        let head = encode_request(request.method, url, request.body);
        let result = round_trip(&mut socket, head.as_bytes()).await;
        socket.close().await;
        result
    }
}

impl HttpTransport for HttpClient {
    type Error = NetworkError;

    async fn send(&mut self, request: Request<'_>) -> Result<Response, Self::Error> {
        self.exchange(request).await
    }
}

/// HTTP client that also speaks HTTPS; owns the TLS buffers
pub struct HttpsClient<RNG> {
    plain: HttpClient,
    rng: RNG,
    buffers: TlsBuffers,
}

impl<RNG> HttpsClient<RNG>
where
    RNG: rand_core::RngCore + rand_core::CryptoRng,
{
    pub fn new(stack: Stack<'static>, rng: RNG, buffers: TlsBuffers) -> Self {
        Self {
            plain: HttpClient::new(stack),
            rng,
            buffers,
        }
    }

    pub async fn exchange(&mut self, request: Request<'_>) -> Result<Response, NetworkError> {
        let url = Url::parse(request.url)?;
        let timeout = Duration::from_millis(request.timeout_ms as u64);
        let result = if url.tls {
            with_timeout(timeout, self.secure(&url, &request)).await
        } else {
            with_timeout(timeout, self.plain.plain(&url, &request)).await
        };
        result.map_err(|_| NetworkError::Timeout)?
    }

    async fn secure(&mut self, url: &Url<'_>, request: &Request<'_>) -> Result<Response, NetworkError> {
        let endpoint = self.plain.resolve(url).await?;
        let mut rx_buffer = [0u8; TCP_RX_BUF];
        let mut tx_buffer = [0u8; TCP_TX_BUF];
        let mut socket =
            TcpConnection::new(self.plain.stack, &mut rx_buffer, &mut tx_buffer, IO_TIMEOUT);
        socket.connect(endpoint).await?;

        let config = TlsConfig::new().with_server_name(url.host);
        let mut tls = TlsConnection::<TcpConnection, Aes128GcmSha256>::new(
            socket,
            &mut *self.buffers.read,
            &mut *self.buffers.write,
        );
        let provider = RngProvider {
            rng: &mut self.rng,
            verifier: NoVerify,
        };
        tls.open(TlsContext::new(&config, provider))
            .await
            .map_err(|e| {
                error!("TLS handshake with {} failed: {:?}", url.host, Debug2Format(&e));
                NetworkError::TlsHandshakeFailed
            })?;
        debug!("TLS session open with {}", url.host);

        let head = encode_request(request.method, url, request.body);
        let result = round_trip(&mut tls, head.as_bytes()).await;
        if let Err((_, e)) = tls.close().await {
            debug!("TLS close: {:?}", Debug2Format(&e));
        }
        result
    }
}

impl<RNG> HttpTransport for HttpsClient<RNG>
where
    RNG: rand_core::RngCore + rand_core::CryptoRng,
{
    type Error = NetworkError;

    async fn send(&mut self, request: Request<'_>) -> Result<Response, Self::Error> {
        self.exchange(request).await
    }
}

/// Send the request and read until the response is complete or the peer
/// closes
async fn round_trip<S>(conn: &mut S, request: &[u8]) -> Result<Response, NetworkError>
where
    S: Read + Write,
{
    conn.write_all(request)
        .await
        .map_err(|_| NetworkError::SocketError)?;
    conn.flush().await.map_err(|_| NetworkError::SocketError)?;

    let mut raw = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        match conn.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if raw.len() + n > MAX_RESPONSE_LEN {
                    return Err(NetworkError::ResponseTooLarge);
                }
                raw.extend_from_slice(&chunk[..n]);
                if response_complete(&raw) {
                    break;
                }
            }
            // some servers reset instead of closing cleanly
            Err(_) if !raw.is_empty() => break,
            Err(_) => return Err(NetworkError::SocketError),
        }
    }

    Ok(parse_response(&raw)?)
}
