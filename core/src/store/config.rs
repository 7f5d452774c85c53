//! Remote store client configuration

use alloc::string::String;

/// Lower bound on request spacing regardless of the configured rate
pub const MIN_REQUEST_INTERVAL_FLOOR_MS: u64 = 2_000;

/// Connection and retry settings for [`RemoteStoreClient`](super::RemoteStoreClient)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Scheme and host, no trailing slash (e.g. `https://example.firebaseio.com`)
    pub base_url: String,
    /// Appended to every URL as `auth=<token>` when set
    pub auth_token: Option<String>,
    /// Whole-exchange timeout handed to the transport
    pub request_timeout_ms: u32,
    /// Attempts per call, including the first (at least one is always made)
    pub retry_count: u32,
    /// Wait between attempts; doubled after a 429
    pub retry_delay_ms: u32,
    /// Minimum spacing between requests once the bootstrap allowance is spent
    pub min_request_interval_ms: u64,
    /// Requests allowed without pacing after boot, so initial loads go out
    /// back to back
    pub bootstrap_allowance: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_token: None,
            request_timeout_ms: 10_000,
            retry_count: 3,
            retry_delay_ms: 1_000,
            min_request_interval_ms: MIN_REQUEST_INTERVAL_FLOOR_MS,
            bootstrap_allowance: 5,
        }
    }
}

impl StoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            ..Self::default()
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u32) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    pub fn with_retry_policy(mut self, retry_count: u32, retry_delay_ms: u32) -> Self {
        self.retry_count = retry_count;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    /// Derive request spacing from a per-minute budget: `60000 / rpm`,
    /// never below [`MIN_REQUEST_INTERVAL_FLOOR_MS`].
    pub fn with_requests_per_minute(mut self, requests_per_minute: u32) -> Self {
        let per_request = 60_000 / u64::from(requests_per_minute.max(1));
        self.min_request_interval_ms = per_request.max(MIN_REQUEST_INTERVAL_FLOOR_MS);
        self
    }

    pub fn with_bootstrap_allowance(mut self, requests: u32) -> Self {
        self.bootstrap_allowance = requests;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::new("https://db.example.com/");
        assert_eq!(config.base_url, "https://db.example.com");
        assert_eq!(config.request_timeout_ms, 10_000);
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.retry_delay_ms, 1_000);
        assert_eq!(config.min_request_interval_ms, 2_000);
        assert_eq!(config.bootstrap_allowance, 5);
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_requests_per_minute() {
        // 60/min would be 1 s, clamped to the floor
        assert_eq!(
            StoreConfig::new("x").with_requests_per_minute(60).min_request_interval_ms,
            2_000
        );
        assert_eq!(
            StoreConfig::new("x").with_requests_per_minute(10).min_request_interval_ms,
            6_000
        );
        assert_eq!(
            StoreConfig::new("x").with_requests_per_minute(0).min_request_interval_ms,
            60_000
        );
    }
}
