//! Live client configuration.

use url::Url;

use crate::error::LiveError;

/// Endpoint used when `ESAV_LIVE_URL` is not set.
pub const DEFAULT_ENDPOINT: &str = "wss://esav.whey.party/xrpc/party.whey.esav.esSync";

/// Number of diagnostic log entries kept by default.
pub const DEFAULT_LOG_CAPACITY: usize = 500;

/// Backoff policy for reconnecting after the transport closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect, in milliseconds
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect attempt `attempt` (0-based): `min(initial * 2^attempt, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

/// Everything a [`crate::LiveClient`] needs at construction.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub endpoint: Url,
    pub reconnect: ReconnectConfig,
    pub log_capacity: usize,
}

impl LiveConfig {
    /// Build a config for `endpoint` with default reconnect and log settings.
    pub fn new(endpoint: &str) -> Result<Self, LiveError> {
        Ok(Self {
            endpoint: parse_endpoint(endpoint)?,
            reconnect: ReconnectConfig::default(),
            log_capacity: DEFAULT_LOG_CAPACITY,
        })
    }

    /// Read configuration from environment variables.
    ///
    /// - `ESAV_LIVE_URL`: WebSocket endpoint (default: [`DEFAULT_ENDPOINT`])
    /// - `ESAV_RECONNECT_BASE_MS`: first backoff delay (default: 1000)
    /// - `ESAV_RECONNECT_MAX_MS`: backoff cap (default: 30000)
    /// - `ESAV_LOG_CAPACITY`: diagnostic log size (default: 500)
    pub fn from_env() -> Result<Self, LiveError> {
        let endpoint =
            std::env::var("ESAV_LIVE_URL").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        let mut config = Self::new(&endpoint)?;

        if let Some(base) = env_number("ESAV_RECONNECT_BASE_MS")? {
            config.reconnect.initial_delay_ms = base;
        }
        if let Some(max) = env_number("ESAV_RECONNECT_MAX_MS")? {
            config.reconnect.max_delay_ms = max;
        }
        if let Some(capacity) = env_number("ESAV_LOG_CAPACITY")? {
            config.log_capacity = capacity as usize;
        }
        Ok(config)
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }
}

fn parse_endpoint(endpoint: &str) -> Result<Url, LiveError> {
    let url = Url::parse(endpoint).map_err(|source| LiveError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        source,
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        _ => Err(LiveError::UnsupportedScheme(endpoint.to_string())),
    }
}

fn env_number(name: &'static str) -> Result<Option<u64>, LiveError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LiveError::InvalidSetting { name, value }),
        Err(_) => Ok(None),
    }
}
