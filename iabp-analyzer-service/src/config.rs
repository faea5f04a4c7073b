use anyhow::{Context as _, Result};
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8501;
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_MAX_UPLOAD_MB: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// Process configuration, read once at startup.
#[derive(Clone)]
pub struct AppConfig {
    pub address: String,
    pub port: u16,
    /// Deploy-time secret; wins over any key typed into a session.
    pub secret_api_key: Option<String>,
    pub app_password: Option<String>,
    pub base_url: String,
    pub model: String,
    pub min_request_interval: Duration,
    pub max_upload_bytes: usize,
    pub request_timeout: Duration,
    /// Sessions idle for longer than this are dropped.
    pub session_ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = match non_empty("STREAMLIT_SERVER_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .with_context(|| format!("STREAMLIT_SERVER_PORT is not a valid port: {}", raw))?,
            None => DEFAULT_PORT,
        };

        let min_interval_ms = parse_or(
            non_empty("IABP_MIN_REQUEST_INTERVAL_MS"),
            "IABP_MIN_REQUEST_INTERVAL_MS",
            DEFAULT_MIN_INTERVAL_MS,
        )?;
        let max_upload_mb = parse_or(
            non_empty("IABP_MAX_UPLOAD_MB"),
            "IABP_MAX_UPLOAD_MB",
            DEFAULT_MAX_UPLOAD_MB,
        )?;
        let timeout_secs = parse_or(
            non_empty("IABP_REQUEST_TIMEOUT_SECS"),
            "IABP_REQUEST_TIMEOUT_SECS",
            DEFAULT_TIMEOUT_SECS,
        )?;
        let session_ttl_secs = parse_or(
            non_empty("IABP_SESSION_TTL_SECS"),
            "IABP_SESSION_TTL_SECS",
            DEFAULT_SESSION_TTL_SECS,
        )?;
        let max_upload_bytes = max_upload_mb
            .checked_mul(1024 * 1024)
            .with_context(|| format!("IABP_MAX_UPLOAD_MB is too large: {}", max_upload_mb))?;

        Ok(Self {
            address: non_empty("STREAMLIT_SERVER_ADDRESS")
                .unwrap_or_else(|| DEFAULT_ADDRESS.to_string()),
            port,
            secret_api_key: non_empty("ANTHROPIC_API_KEY"),
            app_password: non_empty("APP_PASSWORD"),
            base_url: non_empty("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: non_empty("ANTHROPIC_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            min_request_interval: Duration::from_millis(min_interval_ms),
            max_upload_bytes,
            request_timeout: Duration::from_secs(timeout_secs),
            session_ttl: Duration::from_secs(session_ttl_secs),
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.address, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.address, self.port))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            secret_api_key: None,
            app_password: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            min_request_interval: Duration::from_millis(DEFAULT_MIN_INTERVAL_MS),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
        }
    }
}

// Secrets stay out of logs.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("secret_api_key", &self.secret_api_key.as_ref().map(|_| "<redacted>"))
            .field("app_password", &self.app_password.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("min_request_interval", &self.min_request_interval)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("request_timeout", &self.request_timeout)
            .field("session_ttl", &self.session_ttl)
            .finish()
    }
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 8501);
        assert_eq!(config.address, "0.0.0.0");
        assert_eq!(config.min_request_interval, Duration::from_secs(2));
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(config.session_ttl, Duration::from_secs(3600));
        assert!(config.secret_api_key.is_none());
        assert!(config.app_password.is_none());
    }

    #[test]
    fn test_overrides_and_blank_secrets() {
        let config = config_from(&[
            ("STREAMLIT_SERVER_PORT", "9000"),
            ("STREAMLIT_SERVER_ADDRESS", "127.0.0.1"),
            ("ANTHROPIC_API_KEY", "  "),
            ("APP_PASSWORD", "letmein"),
            ("ANTHROPIC_BASE_URL", "http://localhost:1234/"),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert!(config.secret_api_key.is_none());
        assert_eq!(config.app_password.as_deref(), Some("letmein"));
        assert_eq!(config.base_url, "http://localhost:1234");
        assert_eq!(config.socket_addr().unwrap().port(), 9000);
    }

    #[test]
    fn test_invalid_numbers_fail() {
        assert!(config_from(&[("STREAMLIT_SERVER_PORT", "eighty")]).is_err());
        assert!(config_from(&[("IABP_MAX_UPLOAD_MB", "-1")]).is_err());
        assert!(config_from(&[("IABP_SESSION_TTL_SECS", "soon")]).is_err());
    }

    #[test]
    fn test_upload_ceiling_overflow_is_an_error() {
        let huge = usize::MAX.to_string();
        let err = config_from(&[("IABP_MAX_UPLOAD_MB", huge.as_str())]).unwrap_err();
        assert!(err.to_string().contains("IABP_MAX_UPLOAD_MB is too large"));

        let config = config_from(&[("IABP_MAX_UPLOAD_MB", "25")]).unwrap();
        assert_eq!(config.max_upload_bytes, 25 * 1024 * 1024);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = config_from(&[("ANTHROPIC_API_KEY", "sk-ant-secret")]).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-ant-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
