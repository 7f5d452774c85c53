#![deny(unsafe_code)]
//! SNTP client that sets the internal RTC

use defmt::{error, info, warn, Debug2Format};
use embassy_futures::select::{select, Either};
use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_time::{Duration, Instant, Timer};
use rtic_monotonics::fugit::ExtU64;
use rtic_monotonics::Monotonic;

use crate::time::{write_rtc, RtcError, Timestamp};
use crate::Mono;

use super::config::SntpConfig;
use super::error::NetworkError;

const NTP_PORT: u16 = 123;
const NTP_PACKET_LEN: usize = 48;

impl From<RtcError> for NetworkError {
    fn from(e: RtcError) -> Self {
        match e {
            RtcError::NotInitialized => NetworkError::RtcNotInitialized,
            RtcError::HardwareError => NetworkError::RtcHardwareError,
        }
    }
}

pub struct SntpClient {
    config: SntpConfig,
}

impl SntpClient {
    pub fn new(config: SntpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SntpConfig {
        &self.config
    }

    /// Try every server in turn until one answers, then write the RTC
    pub async fn sync(&self, stack: Stack<'static>) -> Result<Timestamp, NetworkError> {
        for server in self.config.servers {
            for attempt in 0..self.config.retry_count {
                match self.request(stack, server).await {
                    Ok(timestamp) => {
                        write_rtc(timestamp)?;
                        info!(
                            "SNTP sync via {}: {}.{:06} UTC",
                            server, timestamp.unix_secs, timestamp.micros
                        );
                        return Ok(timestamp);
                    }
                    Err(e) => {
                        warn!("SNTP {} attempt {} failed: {}", server, attempt + 1, e);
                        Mono::delay(2000_u64.millis()).await;
                    }
                }
            }
        }
        error!("All SNTP sync attempts failed");
        Err(NetworkError::AllServersFailed)
    }

    async fn request(&self, stack: Stack<'static>, server: &str) -> Result<Timestamp, NetworkError> {
        let server_ip = stack
            .dns_query(server, DnsQueryType::A)
            .await
            .map_err(|_| NetworkError::DnsError)?
            .first()
            .copied()
            .ok_or(NetworkError::DnsError)?;
        let endpoint = IpEndpoint::new(server_ip, NTP_PORT);

        let mut rx_meta = [PacketMetadata::EMPTY; 2];
        let mut rx_buffer = [0u8; 64];
        let mut tx_meta = [PacketMetadata::EMPTY; 2];
        let mut tx_buffer = [0u8; 64];
        let mut socket = UdpSocket::new(
            stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        socket.bind(0).map_err(|_| NetworkError::SocketError)?;

        // LI=0, VN=3, Mode=3 (client)
        let mut request = [0u8; NTP_PACKET_LEN];
        request[0] = 0x1B;
        let sent_at = Instant::now();
        socket
            .send_to(&request, endpoint)
            .await
            .map_err(|_| NetworkError::SocketError)?;

        let mut response = [0u8; NTP_PACKET_LEN];
        let timeout = Timer::after(Duration::from_millis(self.config.timeout_ms));
        let (len, from) = match select(timeout, socket.recv_from(&mut response)).await {
            Either::First(_) => return Err(NetworkError::Timeout),
            Either::Second(result) => result.map_err(|_| NetworkError::SocketError)?,
        };
        let rtt = Instant::now().duration_since(sent_at);

        if len < NTP_PACKET_LEN || from.endpoint.addr != server_ip {
            warn!("Unexpected NTP reply from {}", Debug2Format(&from));
            return Err(NetworkError::InvalidResponse);
        }

        let stratum = response[1];
        if stratum == 0 || stratum > self.config.max_stratum {
            warn!("Rejecting stratum {} (max {})", stratum, self.config.max_stratum);
            return Err(NetworkError::ServerError);
        }

        let tx_secs = u32::from_be_bytes([response[40], response[41], response[42], response[43]]);
        let tx_frac = u32::from_be_bytes([response[44], response[45], response[46], response[47]]);

        // half the round trip approximates the server-to-us leg
        Ok(Timestamp::from_ntp(tx_secs as u64, tx_frac).add_micros(rtt.as_micros() / 2))
    }
}
