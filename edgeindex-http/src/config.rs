use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// Base URL of the cluster, e.g. `http://localhost:9200`.
    pub url: String,
    pub timeout_ms: u64,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        HttpBackendConfig {
            url: "http://localhost:9200".to_string(),
            timeout_ms: 10_000,
            username: None,
            password: None,
        }
    }
}

impl HttpBackendConfig {
    pub fn new(url: impl Into<String>) -> Self {
        HttpBackendConfig {
            url: url.into(),
            ..HttpBackendConfig::default()
        }
    }

    pub fn from_env() -> Self {
        let d = HttpBackendConfig::default();
        HttpBackendConfig {
            url: std::env::var("EDGEINDEX_BACKEND_URL").unwrap_or(d.url),
            timeout_ms: std::env::var("EDGEINDEX_BACKEND_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(d.timeout_ms),
            username: std::env::var("EDGEINDEX_BACKEND_USERNAME").ok(),
            password: std::env::var("EDGEINDEX_BACKEND_PASSWORD").ok(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// `url` without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn from_env_reads_overrides() {
        std::env::set_var("EDGEINDEX_BACKEND_URL", "http://search:9200/");
        std::env::set_var("EDGEINDEX_BACKEND_TIMEOUT_MS", "not-a-number");
        std::env::set_var("EDGEINDEX_BACKEND_USERNAME", "elastic");
        let config = HttpBackendConfig::from_env();
        std::env::remove_var("EDGEINDEX_BACKEND_URL");
        std::env::remove_var("EDGEINDEX_BACKEND_TIMEOUT_MS");
        std::env::remove_var("EDGEINDEX_BACKEND_USERNAME");

        assert_eq!(config.base_url(), "http://search:9200");
        assert_eq!(config.timeout_ms, 10_000);
        assert_eq!(config.username.as_deref(), Some("elastic"));
    }
}
