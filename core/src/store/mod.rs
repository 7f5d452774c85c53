//! Remote store client
//!
//! Thin JSON-over-HTTP wrapper around a Firebase-style document tree. Every
//! call is paced (see [`StoreConfig::min_request_interval_ms`]) and retried
//! with a fixed delay that doubles after a 429. 401 and 403 are terminal
//! after a single attempt.
//!
//! Waits are awaited on the supplied [`DelayNs`], so other futures on the
//! same executor keep running while the client backs off.

mod config;
mod error;
mod pacer;

use alloc::string::String;
use core::fmt::Write;

use embedded_hal_async::delay::DelayNs;
use embedded_io::Error as _;
use hal_abstractions::{Clock, HttpTransport, Method, Request};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use config::{StoreConfig, MIN_REQUEST_INTERVAL_FLOOR_MS};
pub use error::StoreError;

use error::kind_label;
use pacer::RequestPacer;

/// Path probed by [`RemoteStoreClient::is_healthy`]
pub const HEALTH_PATH: &str = "/.json";

/// Rate-limited, retrying client for the remote document store
pub struct RemoteStoreClient<T, C, D> {
    config: StoreConfig,
    transport: T,
    clock: C,
    delay: D,
    pacer: RequestPacer,
    last_error: Option<StoreError>,
}

impl<T, C, D> RemoteStoreClient<T, C, D>
where
    T: HttpTransport,
    C: Clock,
    D: DelayNs,
{
    pub fn new(config: StoreConfig, transport: T, clock: C, delay: D) -> Self {
        let pacer = RequestPacer::new(config.min_request_interval_ms, config.bootstrap_allowance);
        Self {
            config,
            transport,
            clock,
            delay,
            pacer,
            last_error: None,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn set_auth_token(&mut self, token: Option<String>) {
        self.config.auth_token = token;
    }

    /// Failure of the most recent call, cleared by the next success
    pub fn last_error(&self) -> Option<StoreError> {
        self.last_error
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Full URL for `path`, with the auth token appended when configured
    pub fn url_for(&self, path: &str) -> String {
        let mut url = String::with_capacity(self.config.base_url.len() + path.len() + 48);
        url.push_str(&self.config.base_url);
        url.push_str(path);
        if let Some(token) = &self.config.auth_token {
            url.push(if path.contains('?') { '&' } else { '?' });
            url.push_str("auth=");
            url.push_str(token);
        }
        url
    }

    /// Raw body of `path`
    pub async fn get(&mut self, path: &str) -> Result<String, StoreError> {
        self.execute(Method::Get, path, None).await
    }

    pub async fn put(&mut self, path: &str, body: &str) -> Result<(), StoreError> {
        self.execute(Method::Put, path, Some(body)).await.map(|_| ())
    }

    /// Append under `path`; returns the response body (the generated key)
    pub async fn post(&mut self, path: &str, body: &str) -> Result<String, StoreError> {
        self.execute(Method::Post, path, Some(body)).await
    }

    pub async fn delete(&mut self, path: &str) -> Result<(), StoreError> {
        self.execute(Method::Delete, path, None).await.map(|_| ())
    }

    /// Fetch and decode `path`.
    ///
    /// A `null` or empty body means the document does not exist yet and
    /// yields `Ok(None)`. A body that does not decode is [`StoreError::Parse`].
    pub async fn load_json<V: DeserializeOwned>(
        &mut self,
        path: &str,
    ) -> Result<Option<V>, StoreError> {
        let body = self.get(path).await?;
        let body = body.trim();
        if body.is_empty() || body == "null" {
            debug!("{} does not exist yet", path);
            return Ok(None);
        }

        match serde_json::from_str(body) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                let mut message: heapless::String<64> = heapless::String::new();
                let _ = write!(message, "{}", e);
                error!("Failed to parse {}: {}", path, message.as_str());
                self.last_error = Some(StoreError::Parse);
                Err(StoreError::Parse)
            }
        }
    }

    /// Encode `value` and PUT it to `path`
    pub async fn save_json<V: Serialize + ?Sized>(
        &mut self,
        path: &str,
        value: &V,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(value).map_err(|_| {
            error!("Failed to serialize {}", path);
            self.last_error = Some(StoreError::Serialize);
            StoreError::Serialize
        })?;
        self.put(path, &body).await
    }

    /// Whether the store root answers a GET
    pub async fn is_healthy(&mut self) -> bool {
        self.get(HEALTH_PATH).await.is_ok()
    }

    async fn pace(&mut self) {
        let wait = self.pacer.admit(self.clock.now_ms());
        if wait > 0 {
            debug!("Rate limiting: waiting {} ms", wait);
            self.delay.delay_ms(u32::try_from(wait).unwrap_or(u32::MAX)).await;
        }
    }

    async fn execute(
        &mut self,
        method: Method,
        path: &str,
        body: Option<&str>,
    ) -> Result<String, StoreError> {
        self.pace().await;

        let url = self.url_for(path);
        let attempts = self.config.retry_count.max(1);
        let mut failure = StoreError::Transport;

        for attempt in 1..=attempts {
            if attempt > 1 {
                let wait = if failure == StoreError::RateLimited {
                    self.config.retry_delay_ms.saturating_mul(2)
                } else {
                    self.config.retry_delay_ms
                };
                self.delay.delay_ms(wait).await;
            }

            let request = Request {
                method,
                url: &url,
                body,
                timeout_ms: self.config.request_timeout_ms,
            };

            match self.transport.send(request).await {
                Ok(response) if matches!(response.status, 200 | 201) => {
                    trace!("{} {} -> {}", method, path, response.status);
                    self.pacer.record_success(self.clock.now_ms());
                    self.last_error = None;
                    return Ok(response.body);
                }
                Ok(response) => {
                    let error = StoreError::from_status(response.status);
                    if error.is_terminal() {
                        error!("{} {} rejected: {}", method, path, error);
                        self.last_error = Some(error);
                        return Err(error);
                    }
                    warn!(
                        "{} {} failed: {} (attempt {}/{})",
                        method, path, error, attempt, attempts
                    );
                    failure = error;
                }
                Err(e) => {
                    warn!(
                        "{} {} transport error: {} (attempt {}/{})",
                        method,
                        path,
                        kind_label(e.kind()),
                        attempt,
                        attempts
                    );
                    failure = StoreError::Transport;
                }
            }
        }

        error!(
            "{} {} failed after {} attempts: {}",
            method, path, attempts, failure
        );
        self.last_error = Some(failure);
        Err(failure)
    }
}
