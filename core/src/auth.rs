//! Authorization gate for the local web API
//!
//! Every inbound request passes three checks, in this order:
//!
//! 1. allow-list (only when enabled)
//! 2. per-client fixed-window rate limit
//! 3. API key (only when auth is enabled)
//!
//! A client that exceeds its budget stays blocked until its window rolls
//! over or it is reset explicitly. The window rolls over once strictly more
//! than `window_ms` has passed since it opened.

use alloc::string::String;
use heapless::FnvIndexMap;
use serde::Serialize;

pub const DEFAULT_MAX_REQUESTS: u32 = 60;
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Clients tracked at once (power of two for the index map)
pub const MAX_TRACKED_CLIENTS: usize = 16;

pub const MAX_ALLOW_LIST: usize = 8;

/// Longest textual IPv6 address with an embedded IPv4 tail fits
pub const MAX_CLIENT_ID_LEN: usize = 48;

pub type ClientId = heapless::String<MAX_CLIENT_ID_LEN>;

/// Gate settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    /// Expected key when `auth_enabled`. With auth enabled and no key
    /// configured every request fails the key check.
    pub api_key: Option<String>,
    pub auth_enabled: bool,
    pub max_requests_per_window: u32,
    pub window_ms: u64,
    pub allow_list_enabled: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            auth_enabled: false,
            max_requests_per_window: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW_MS,
            allow_list_enabled: false,
        }
    }
}

impl GateConfig {
    /// Require `key` on every request
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self.auth_enabled = true;
        self
    }

    pub fn with_rate_limit(mut self, max_requests: u32, window_ms: u64) -> Self {
        self.max_requests_per_window = max_requests;
        self.window_ms = window_ms;
        self
    }
}

/// Per-client window state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClientRateLimitEntry {
    pub window_start_ms: u64,
    pub request_count: u32,
    pub blocked: bool,
}

/// Why a request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Denial {
    NotAllowListed,
    RateLimited,
    InvalidKey,
}

impl Denial {
    /// HTTP status for the refusal
    pub fn status_code(&self) -> u16 {
        match self {
            Self::RateLimited => 429,
            Self::NotAllowListed | Self::InvalidKey => 401,
        }
    }
}

impl core::fmt::Display for Denial {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotAllowListed => write!(f, "Client not allow-listed"),
            Self::RateLimited => write!(f, "Rate limit exceeded"),
            Self::InvalidKey => write!(f, "Invalid API key"),
        }
    }
}

impl core::error::Error for Denial {}

/// Served as `/api/security`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityReport {
    pub auth_enabled: bool,
    pub max_requests_per_window: u32,
    pub window_ms: u64,
    pub allow_list_enabled: bool,
    pub allow_listed: usize,
    pub tracked_clients: usize,
}

#[derive(Debug, Default)]
pub struct AuthorizationGate {
    config: GateConfig,
    allow_list: heapless::Vec<ClientId, MAX_ALLOW_LIST>,
    clients: FnvIndexMap<ClientId, ClientRateLimitEntry, MAX_TRACKED_CLIENTS>,
}

impl AuthorizationGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn set_api_key(&mut self, key: impl Into<String>) {
        self.config.api_key = Some(key.into());
        info!("API key configured");
    }

    pub fn enable_auth(&mut self, enable: bool) {
        self.config.auth_enabled = enable;
        info!("Authentication enabled: {}", enable);
    }

    pub fn set_rate_limit(&mut self, max_requests: u32, window_ms: u64) {
        self.config.max_requests_per_window = max_requests;
        self.config.window_ms = window_ms;
        info!("Rate limit set to {} requests per {} ms", max_requests, window_ms);
    }

    /// Returns `false` if the list is full or the id does not fit
    pub fn add_to_allow_list(&mut self, client: &str) -> bool {
        let Some(id) = make_client_id(client) else {
            return false;
        };
        if self.allow_list.contains(&id) {
            return true;
        }
        let added = self.allow_list.push(id).is_ok();
        if added {
            info!("Allow-listed {}", client);
        }
        added
    }

    pub fn enable_allow_list(&mut self, enable: bool) {
        self.config.allow_list_enabled = enable;
        info!("Allow-list enabled: {}", enable);
    }

    /// Run all checks for one request from `client`
    pub fn check(
        &mut self,
        client: &str,
        provided_key: Option<&str>,
        now_ms: u64,
    ) -> Result<(), Denial> {
        if !self.is_allow_listed(client) {
            warn!("Client {} not allow-listed", client);
            return Err(Denial::NotAllowListed);
        }
        if !self.within_rate_limit(client, now_ms) {
            return Err(Denial::RateLimited);
        }
        if !self.key_matches(provided_key) {
            warn!("Invalid API key from {}", client);
            return Err(Denial::InvalidKey);
        }
        Ok(())
    }

    pub fn authorize(&mut self, client: &str, provided_key: Option<&str>, now_ms: u64) -> bool {
        self.check(client, provided_key, now_ms).is_ok()
    }

    /// Forget `client`'s window. Returns whether it was tracked.
    pub fn reset_rate_limit(&mut self, client: &str) -> bool {
        let removed = make_client_id(client)
            .and_then(|id| self.clients.remove(&id))
            .is_some();
        if removed {
            info!("Rate limit reset for {}", client);
        }
        removed
    }

    /// Forget every tracked client
    pub fn clear_all(&mut self) {
        self.clients.clear();
        info!("All rate limits cleared");
    }

    pub fn entry(&self, client: &str) -> Option<&ClientRateLimitEntry> {
        make_client_id(client).and_then(|id| self.clients.get(&id))
    }

    pub fn report(&self) -> SecurityReport {
        SecurityReport {
            auth_enabled: self.config.auth_enabled,
            max_requests_per_window: self.config.max_requests_per_window,
            window_ms: self.config.window_ms,
            allow_list_enabled: self.config.allow_list_enabled,
            allow_listed: self.allow_list.len(),
            tracked_clients: self.clients.len(),
        }
    }

    fn is_allow_listed(&self, client: &str) -> bool {
        !self.config.allow_list_enabled || self.allow_list.iter().any(|c| c.as_str() == client)
    }

    fn key_matches(&self, provided: Option<&str>) -> bool {
        if !self.config.auth_enabled {
            return true;
        }
        match (self.config.api_key.as_deref(), provided) {
            (Some(expected), Some(given)) => expected == given,
            _ => false,
        }
    }

    fn within_rate_limit(&mut self, client: &str, now_ms: u64) -> bool {
        let id = truncated_client_id(client);
        let window_ms = self.config.window_ms;
        let max_requests = self.config.max_requests_per_window;

        if !self.clients.contains_key(&id) {
            self.make_room(now_ms);
            let _ = self.clients.insert(
                id,
                ClientRateLimitEntry {
                    window_start_ms: now_ms,
                    request_count: 1,
                    blocked: false,
                },
            );
            return true;
        }
        let Some(entry) = self.clients.get_mut(&id) else {
            return true;
        };

        if now_ms.saturating_sub(entry.window_start_ms) > window_ms {
            *entry = ClientRateLimitEntry {
                window_start_ms: now_ms,
                request_count: 1,
                blocked: false,
            };
            return true;
        }

        entry.request_count = entry.request_count.saturating_add(1);
        if entry.blocked {
            return false;
        }
        if entry.request_count > max_requests {
            entry.blocked = true;
            warn!("Rate limit exceeded for {}", client);
            return false;
        }
        true
    }

    /// Free a slot when the table is full: drop clients whose window has
    /// passed, else the one with the oldest window.
    fn make_room(&mut self, now_ms: u64) {
        if self.clients.len() < MAX_TRACKED_CLIENTS {
            return;
        }
        let window_ms = self.config.window_ms;
        let stale: heapless::Vec<ClientId, MAX_TRACKED_CLIENTS> = self
            .clients
            .iter()
            .filter(|(_, e)| now_ms.saturating_sub(e.window_start_ms) > window_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.clients.remove(id);
        }
        if !stale.is_empty() {
            return;
        }

        let oldest = self
            .clients
            .iter()
            .min_by_key(|(_, e)| e.window_start_ms)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            debug!("Evicting rate limit entry for {}", id.as_str());
            self.clients.remove(&id);
        }
    }
}

fn make_client_id(client: &str) -> Option<ClientId> {
    let mut id = ClientId::new();
    id.push_str(client).ok()?;
    Some(id)
}

/// Rate-limit key for `client`, cut at a char boundary if too long
fn truncated_client_id(client: &str) -> ClientId {
    let mut end = client.len().min(MAX_CLIENT_ID_LEN);
    while !client.is_char_boundary(end) {
        end -= 1;
    }
    make_client_id(&client[..end]).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn test_rate_limit_window() {
        let mut gate = AuthorizationGate::new(GateConfig::default().with_rate_limit(3, 60_000));
        assert!(gate.authorize("10.0.0.2", None, 0));
        assert!(gate.authorize("10.0.0.2", None, 1));
        assert!(gate.authorize("10.0.0.2", None, 2));
        assert_eq!(gate.check("10.0.0.2", None, 3), Err(Denial::RateLimited));

        // window boundary is exclusive
        assert_eq!(gate.check("10.0.0.2", None, 60_000), Err(Denial::RateLimited));
        assert!(gate.authorize("10.0.0.2", None, 60_001));

        let entry = gate.entry("10.0.0.2").unwrap();
        assert_eq!(entry.request_count, 1);
        assert_eq!(entry.window_start_ms, 60_001);
        assert!(!entry.blocked);
    }

    #[test]
    fn test_block_is_sticky_within_window() {
        let mut gate = AuthorizationGate::new(GateConfig::default().with_rate_limit(1, 1_000));
        assert!(gate.authorize("a", None, 0));
        assert!(!gate.authorize("a", None, 10));
        assert!(gate.entry("a").unwrap().blocked);

        // raising the limit mid-window does not unblock
        gate.set_rate_limit(100, 1_000);
        assert!(!gate.authorize("a", None, 20));
    }

    #[test]
    fn test_clients_are_independent() {
        let mut gate = AuthorizationGate::new(GateConfig::default().with_rate_limit(1, 1_000));
        assert!(gate.authorize("a", None, 0));
        assert!(!gate.authorize("a", None, 1));
        assert!(gate.authorize("b", None, 1));
    }

    #[test]
    fn test_api_key() {
        let mut gate = AuthorizationGate::new(GateConfig::default().with_api_key("k3y"));
        assert_eq!(gate.check("a", None, 0), Err(Denial::InvalidKey));
        assert_eq!(gate.check("a", Some("wrong"), 0), Err(Denial::InvalidKey));
        assert_eq!(gate.check("a", Some("k3y"), 0), Ok(()));

        gate.enable_auth(false);
        assert_eq!(gate.check("a", Some("anything"), 0), Ok(()));
    }

    #[test]
    fn test_auth_enabled_without_key_denies() {
        let mut gate = AuthorizationGate::default();
        gate.enable_auth(true);
        assert_eq!(gate.check("a", Some(""), 0), Err(Denial::InvalidKey));

        gate.set_api_key("late");
        assert_eq!(gate.check("a", Some("late"), 0), Ok(()));
    }

    #[test]
    fn test_allow_list_checked_first() {
        let mut gate = AuthorizationGate::new(GateConfig::default().with_api_key("k"));
        gate.enable_allow_list(true);
        assert!(gate.add_to_allow_list("192.168.1.10"));

        assert_eq!(gate.check("192.168.1.99", Some("k"), 0), Err(Denial::NotAllowListed));
        // refused before reaching the rate limiter
        assert!(gate.entry("192.168.1.99").is_none());
        assert_eq!(gate.check("192.168.1.10", Some("k"), 0), Ok(()));
    }

    #[test]
    fn test_rate_limit_checked_before_key() {
        let mut gate =
            AuthorizationGate::new(GateConfig::default().with_api_key("k").with_rate_limit(1, 1_000));
        assert_eq!(gate.check("a", Some("bad"), 0), Err(Denial::InvalidKey));
        assert_eq!(gate.check("a", Some("k"), 1), Err(Denial::RateLimited));
    }

    #[test]
    fn test_reset_and_clear() {
        let mut gate = AuthorizationGate::new(GateConfig::default().with_rate_limit(1, 60_000));
        gate.authorize("a", None, 0);
        gate.authorize("a", None, 1);
        gate.authorize("b", None, 1);

        assert!(gate.reset_rate_limit("a"));
        assert!(!gate.reset_rate_limit("a"));
        assert!(gate.authorize("a", None, 2));

        gate.clear_all();
        assert_eq!(gate.report().tracked_clients, 0);
    }

    #[test]
    fn test_full_table_evicts() {
        let mut gate = AuthorizationGate::new(GateConfig::default().with_rate_limit(5, 1_000));
        for n in 0..MAX_TRACKED_CLIENTS {
            assert!(gate.authorize(&format!("10.0.0.{}", n), None, n as u64));
        }

        // all windows live: the oldest goes
        assert!(gate.authorize("10.0.1.1", None, 100));
        assert!(gate.entry("10.0.0.0").is_none());
        assert!(gate.entry("10.0.0.1").is_some());
        assert_eq!(gate.report().tracked_clients, MAX_TRACKED_CLIENTS);

        // every earlier window has passed: they are all pruned
        assert!(gate.authorize("10.0.1.2", None, 1_050));
        assert_eq!(gate.report().tracked_clients, 2);
    }

    #[test]
    fn test_report() {
        let mut gate = AuthorizationGate::new(GateConfig::default().with_api_key("k"));
        gate.add_to_allow_list("1.2.3.4");
        gate.authorize("1.2.3.4", Some("k"), 0);

        let report = gate.report();
        assert!(report.auth_enabled);
        assert!(!report.allow_list_enabled);
        assert_eq!(report.allow_listed, 1);
        assert_eq!(report.tracked_clients, 1);
        assert_eq!(report.max_requests_per_window, DEFAULT_MAX_REQUESTS);
        assert_eq!(report.window_ms, DEFAULT_WINDOW_MS);
    }

    #[test]
    fn test_denial_status_codes() {
        assert_eq!(Denial::RateLimited.status_code(), 429);
        assert_eq!(Denial::InvalidKey.status_code(), 401);
        assert_eq!(Denial::NotAllowListed.status_code(), 401);
    }
}
