use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use url::Url;

pub const DEFAULT_STATUS_TTL_MS: u64 = 60_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_STATUS_POLL_MS: u64 = 60_000;
pub const DEFAULT_COUNTDOWN_TICK_MS: u64 = 1_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Service root including the `/api/` prefix, always with a trailing slash.
    pub base_url: Url,
    pub status_ttl: Duration,
    pub request_timeout: Duration,
    pub status_poll_interval: Duration,
    pub countdown_tick: Duration,
}

impl ClientConfig {
    /// Creates a config with default timings for the given service URL.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: Self::normalize_base_url(base_url)?,
            status_ttl: Duration::from_millis(DEFAULT_STATUS_TTL_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            status_poll_interval: Duration::from_millis(DEFAULT_STATUS_POLL_MS),
            countdown_tick: Duration::from_millis(DEFAULT_COUNTDOWN_TICK_MS),
        })
    }

    /// Creates a new client config from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_base_url(None)
    }

    /// Creates a new client config from environment variables with an optional base URL
    /// that takes precedence over `ATHAN_BASE_URL`.
    pub fn from_env_with_base_url(base_url: Option<String>) -> Result<Self> {
        dotenv::dotenv().ok();

        let base_url = match base_url {
            Some(url) => url,
            None => std::env::var("ATHAN_BASE_URL")
                .map_err(|_| anyhow!("ATHAN_BASE_URL environment variable is required"))?,
        };

        let mut config = Self::new(&base_url)?;
        config.status_ttl = env_millis("ATHAN_STATUS_TTL_MS", DEFAULT_STATUS_TTL_MS)?;
        config.request_timeout = env_millis("ATHAN_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT_MS)?;
        config.status_poll_interval = env_millis("ATHAN_STATUS_POLL_MS", DEFAULT_STATUS_POLL_MS)?;
        config.countdown_tick = env_millis("ATHAN_COUNTDOWN_TICK_MS", DEFAULT_COUNTDOWN_TICK_MS)?;

        Ok(config)
    }

    /// Ensures the URL points at the `/api/` root so endpoints can be joined onto it.
    fn normalize_base_url(raw: &str) -> Result<Url> {
        let mut raw = raw.trim().trim_end_matches('/').to_string();
        if !raw.ends_with("/api") {
            raw.push_str("/api");
        }
        raw.push('/');

        let url = Url::parse(&raw).with_context(|| format!("invalid service URL: {}", raw))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(anyhow!("unsupported URL scheme '{}', expected http or https", other)),
        }
    }
}

fn env_millis(name: &str, default: u64) -> Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => {
            let millis: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{} must be a whole number of milliseconds", name))?;
            if millis == 0 {
                return Err(anyhow!("{} must be greater than zero", name));
            }
            Ok(Duration::from_millis(millis))
        }
        Err(_) => Ok(Duration::from_millis(default)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_api_prefix() {
        let config = ClientConfig::new("http://athan.local:8000").unwrap();
        assert_eq!(config.base_url.as_str(), "http://athan.local:8000/api/");
    }

    #[test]
    fn keeps_existing_api_prefix() {
        let config = ClientConfig::new("http://athan.local:8000/api/").unwrap();
        assert_eq!(config.base_url.as_str(), "http://athan.local:8000/api/");
        assert_eq!(config.status_ttl, Duration::from_millis(60_000));
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(ClientConfig::new("ftp://athan.local").is_err());
    }
}
