#![deny(unsafe_code)]
//! Network and service configuration
//!
//! Secrets and site settings are baked in at build time from the
//! environment (`STORE_URL`, `STORE_AUTH_TOKEN`, `API_KEY`,
//! `WEATHER_API_KEY`, `WEATHER_LAT`, `WEATHER_LON`). Unset values fall back
//! to the defaults below.

use dispenser_core::weather::WeatherConfig;
use dispenser_core::{GateConfig, StoreConfig};

/// SNTP client configuration
#[derive(Debug, Clone)]
pub struct SntpConfig {
    /// NTP servers to try (in order)
    pub servers: &'static [&'static str],
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// Number of retry attempts per server
    pub retry_count: usize,
    /// Maximum accepted stratum level (1-15)
    pub max_stratum: u8,
    /// Interval between resyncs once the first sync succeeded
    pub resync_interval_ms: u64,
}

impl Default for SntpConfig {
    fn default() -> Self {
        Self {
            servers: &["pool.ntp.org", "time.google.com", "time.cloudflare.com"],
            timeout_ms: 5000,
            retry_count: 3,
            max_stratum: 3,
            resync_interval_ms: 15 * 60 * 1000,
        }
    }
}

/// Network stack configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// MAC address for Ethernet
    pub mac_addr: [u8; 6],
    /// Random seed for network stack
    pub seed: u64,
    /// Port of the local API server
    pub api_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mac_addr: [0x02, 0x00, 0x00, 0x12, 0x34, 0x56],
            seed: 0x1234_5678_u64,
            api_port: 8080,
        }
    }
}

const STORE_URL: Option<&str> = option_env!("STORE_URL");
const STORE_AUTH_TOKEN: Option<&str> = option_env!("STORE_AUTH_TOKEN");
const API_KEY: Option<&str> = option_env!("API_KEY");
const WEATHER_API_KEY: Option<&str> = option_env!("WEATHER_API_KEY");
const WEATHER_LAT: Option<&str> = option_env!("WEATHER_LAT");
const WEATHER_LON: Option<&str> = option_env!("WEATHER_LON");

const DEFAULT_STORE_URL: &str = "https://dispenser-default-rtdb.firebaseio.com";
const DEFAULT_LATITUDE: f64 = 35.074824;
const DEFAULT_LONGITUDE: f64 = -89.796545;

/// Remote store endpoint and credentials
pub fn store_config() -> StoreConfig {
    let config = StoreConfig::new(STORE_URL.unwrap_or(DEFAULT_STORE_URL));
    match STORE_AUTH_TOKEN {
        Some(token) => config.with_auth_token(token),
        None => config,
    }
}

/// Local API gate. Without a baked-in key only rate limiting applies.
pub fn gate_config() -> GateConfig {
    match API_KEY {
        Some(key) => GateConfig::default().with_api_key(key),
        None => GateConfig::default(),
    }
}

/// `None` when no weather key was provided; the weather line then stays empty
pub fn weather_config() -> Option<WeatherConfig> {
    let key = WEATHER_API_KEY?;
    let lat = WEATHER_LAT
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_LATITUDE);
    let lon = WEATHER_LON
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_LONGITUDE);
    Some(WeatherConfig::new(key, lat, lon))
}
