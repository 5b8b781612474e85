//! Client configuration: endpoint, reconnect policy, and request timeout.
//!
//! The endpoint is either an explicit `ws(s)://` URL or derived from an
//! `http(s)://` origin by appending [`RPC_PATH`], the same way a browser page
//! derives its socket URL from `location`.

use std::time::Duration;

pub const RPC_PATH: &str = "/ws-rpc";
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:9867";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The base URL is not `http://` or `https://`.
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
    /// An environment variable holds a value that cannot be used.
    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

// =============================================================================
// RECONNECT POLICY
// =============================================================================

/// When and how often the connection manager retries a dropped socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// `false` disables reconnection entirely.
    pub enabled: bool,
    /// Fixed delay between attempts.
    pub interval: Duration,
    /// Consecutive attempts allowed before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    #[must_use]
    pub fn bounded(max_attempts: u32, interval: Duration) -> Self {
        Self { enabled: true, interval, max_attempts: Some(max_attempts) }
    }

    #[must_use]
    pub fn forever(interval: Duration) -> Self {
        Self { enabled: true, interval, max_attempts: None }
    }

    #[must_use]
    pub fn never() -> Self {
        Self { enabled: false, interval: Duration::ZERO, max_attempts: Some(0) }
    }

    /// Whether the `attempt`-th consecutive reconnect (1-based) may run.
    #[must_use]
    pub fn should_reconnect(&self, attempt: u32) -> bool {
        self.enabled && self.max_attempts.is_none_or(|max| attempt <= max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::bounded(
            DEFAULT_RECONNECT_MAX_ATTEMPTS,
            Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
        )
    }
}

// =============================================================================
// CLIENT CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Full `ws://` or `wss://` endpoint.
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// How long a query/command may stay pending before it is rejected.
    pub request_timeout: Duration,
    /// Re-send `subscribe` for every active channel when a handshake arrives.
    pub resubscribe_on_handshake: bool,
}

impl ClientConfig {
    /// Config for an explicit socket URL with default policy.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            resubscribe_on_handshake: false,
        }
    }

    /// Config for the RPC endpoint under an `http(s)://` origin.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBaseUrl`] for any other scheme.
    pub fn from_base_url(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(ws_url(base_url)?))
    }

    /// Build config from environment variables.
    ///
    /// - `RPC_URL`: explicit socket URL, wins over `RPC_BASE_URL`
    /// - `RPC_BASE_URL`: origin to derive the URL from (default `http://127.0.0.1:9867`)
    /// - `RPC_RECONNECT`: `always` (default) or `never`
    /// - `RPC_RECONNECT_INTERVAL_MS`: default 3000
    /// - `RPC_RECONNECT_MAX_ATTEMPTS`: default 10, `0` retries forever
    /// - `RPC_REQUEST_TIMEOUT_SECS`: default 30
    /// - `RPC_RESUBSCRIBE`: `true` or `false` (default)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a bad base URL or an unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match env_string("RPC_URL") {
            Some(url) => Self::new(url),
            None => {
                let base = env_string("RPC_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
                Self::from_base_url(&base)?
            }
        };

        let interval = Duration::from_millis(env_parse("RPC_RECONNECT_INTERVAL_MS", DEFAULT_RECONNECT_INTERVAL_MS)?);
        config.reconnect = match env_string("RPC_RECONNECT").as_deref() {
            None | Some("always") => match env_parse("RPC_RECONNECT_MAX_ATTEMPTS", DEFAULT_RECONNECT_MAX_ATTEMPTS)? {
                0 => ReconnectPolicy::forever(interval),
                max => ReconnectPolicy::bounded(max, interval),
            },
            Some("never") => ReconnectPolicy::never(),
            Some(other) => {
                return Err(ConfigError::InvalidValue { var: "RPC_RECONNECT", value: other.to_owned() });
            }
        };
        config.request_timeout =
            Duration::from_secs(env_parse("RPC_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?);
        config.resubscribe_on_handshake = env_parse("RPC_RESUBSCRIBE", false)?;

        Ok(config)
    }
}

/// Derive the RPC socket URL from an `http(s)://` origin.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBaseUrl`] for any other scheme.
pub fn ws_url(base_url: &str) -> Result<String, ConfigError> {
    let trimmed = base_url.trim_end_matches('/');

    if let Some(rest) = trimmed.strip_prefix("http://") {
        return Ok(format!("ws://{rest}{RPC_PATH}"));
    }
    if let Some(rest) = trimmed.strip_prefix("https://") {
        return Ok(format!("wss://{rest}{RPC_PATH}"));
    }

    Err(ConfigError::InvalidBaseUrl(base_url.to_owned()))
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).into_iter().find(|v| !v.is_empty())
}

fn env_parse<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env_string(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { var: key, value: raw.clone() }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
