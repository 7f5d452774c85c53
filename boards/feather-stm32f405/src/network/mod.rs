//! Network services on the W5500 / embassy-net stack
//!
//! - **`config`**: SNTP, stack and service settings
//! - **`error`**: [`NetworkError`], the transport error type
//! - **`http`**: HTTP and HTTPS (TLS 1.3) clients implementing `HttpTransport`
//! - **`manager`**: DHCP wait and link/address queries
//! - **`server`**: local API server
//! - **`sntp`**: SNTP client that sets the RTC
//! - **`socket`**: TCP socket wrapper for embedded-io-async

pub mod config;
pub mod error;
pub mod http;
pub mod manager;
pub mod server;
pub mod sntp;
pub mod socket;

pub use config::{NetworkConfig, SntpConfig};
pub use error::NetworkError;
pub use http::{HttpClient, HttpsClient};
pub use sntp::SntpClient;
