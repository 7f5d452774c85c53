#![deny(unsafe_code)]
//! Local API server
//!
//! Accepts one connection at a time on the API port, reads a single
//! request, answers through [`dispenser_core::handle`] and closes. The
//! device state is borrowed only while the handler runs.

use alloc::format;
use core::cell::RefCell;

use defmt::{debug, info, warn};
use dispenser_core::http::{encode_response, parse_request, HttpError, MAX_BODY_LEN, MAX_HEAD_LEN};
use dispenser_core::{handle, ApiRequest, ApiResponse, DeviceState, Now};
use embassy_net::Stack;
use embassy_time::Duration;
use embedded_io_async::{Read, Write};
use hal_abstractions::{Clock, WallClock};

use crate::time::BoardClock;

use super::error::NetworkError;
use super::socket::TcpConnection;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn serve<R>(
    stack: Stack<'static>,
    port: u16,
    state: &RefCell<DeviceState>,
    rng: &mut R,
) -> !
where
    R: rand_core::RngCore,
{
    let mut rx_buffer = [0u8; 1536];
    let mut tx_buffer = [0u8; 2048];
    info!("API server listening on port {}", port);

    loop {
        let mut socket = TcpConnection::new(stack, &mut rx_buffer, &mut tx_buffer, REQUEST_TIMEOUT);
        if let Err(e) = socket.accept(port).await {
            warn!("Accept failed: {}", e);
            continue;
        }

        let client = socket
            .remote_endpoint()
            .map(|ep| format!("{}", ep.addr))
            .unwrap_or_default();

        match respond(&mut socket, &client, state, rng).await {
            Ok(status) => debug!("{} -> {}", client.as_str(), status),
            Err(e) => {
                warn!("Request from {} failed: {}", client.as_str(), e);
                socket.abort();
                continue;
            }
        }
        socket.close().await;
    }
}

async fn respond<R>(
    socket: &mut TcpConnection<'_>,
    client: &str,
    state: &RefCell<DeviceState>,
    rng: &mut R,
) -> Result<u16, NetworkError>
where
    R: rand_core::RngCore,
{
    let mut buf = [0u8; MAX_HEAD_LEN + MAX_BODY_LEN];
    let mut len = 0;

    let response = loop {
        let n = socket.read(&mut buf[len..]).await?;
        if n == 0 {
            return Err(NetworkError::SocketError);
        }
        len += n;

        match parse_request(&buf[..len]) {
            Ok(Some(request)) => {
                let clock = BoardClock;
                let now = Now {
                    ms: clock.now_ms(),
                    unix_secs: clock.unix_secs(),
                };
                let api_request = ApiRequest {
                    method: request.method,
                    path: request.target,
                    client,
                    api_key: request.api_key,
                    body: request.body,
                };
                break handle(&mut state.borrow_mut(), &api_request, now, rng);
            }
            Ok(None) if len < buf.len() => continue,
            Ok(None) | Err(HttpError::TooLarge) => {
                break ApiResponse::failure(413, "Request too large")
            }
            Err(HttpError::UnsupportedMethod) => {
                break ApiResponse::failure(405, "Method Not Allowed")
            }
            Err(_) => break ApiResponse::failure(400, "Bad request"),
        }
    };

    socket.write_all(encode_response(&response).as_bytes()).await?;
    socket.flush().await?;
    Ok(response.status)
}
