#![deny(unsafe_code)]
//! TCP socket wrapper implementing embedded-io-async
//!
//! `embedded-tls` and the HTTP code both talk to the connection through the
//! `embedded-io-async` traits; this adapts `embassy_net::tcp::TcpSocket` to
//! them with [`NetworkError`] as the error type.

use embassy_net::tcp::TcpSocket;
use embassy_net::{IpEndpoint, Stack};
use embassy_time::Duration;
use embedded_io_async::{ErrorType, Read, Write};

use super::error::NetworkError;

pub struct TcpConnection<'a> {
    socket: TcpSocket<'a>,
}

impl<'a> TcpConnection<'a> {
    /// `timeout` bounds each read or write, not the whole exchange
    pub fn new(
        stack: Stack<'a>,
        rx_buffer: &'a mut [u8],
        tx_buffer: &'a mut [u8],
        timeout: Duration,
    ) -> Self {
        let mut socket = TcpSocket::new(stack, rx_buffer, tx_buffer);
        socket.set_timeout(Some(timeout));
        Self { socket }
    }

    pub async fn connect(&mut self, endpoint: IpEndpoint) -> Result<(), NetworkError> {
        self.socket
            .connect(endpoint)
            .await
            .map_err(|_| NetworkError::SocketError)
    }

    /// Wait for one inbound connection on `port`
    pub async fn accept(&mut self, port: u16) -> Result<(), NetworkError> {
        self.socket
            .accept(port)
            .await
            .map_err(|_| NetworkError::SocketError)
    }

    /// Address of the connected peer
    pub fn remote_endpoint(&self) -> Option<IpEndpoint> {
        self.socket.remote_endpoint()
    }

    /// Send FIN and flush what is still buffered
    pub async fn close(&mut self) {
        self.socket.close();
        let _ = self.socket.flush().await;
    }

    /// Drop the connection without the closing handshake
    pub fn abort(&mut self) {
        self.socket.abort();
    }
}

impl ErrorType for TcpConnection<'_> {
    type Error = NetworkError;
}

impl Read for TcpConnection<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.socket
            .read(buf)
            .await
            .map_err(|_| NetworkError::SocketError)
    }
}

impl Write for TcpConnection<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.socket
            .write(buf)
            .await
            .map_err(|_| NetworkError::SocketError)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket
            .flush()
            .await
            .map_err(|_| NetworkError::SocketError)
    }
}
