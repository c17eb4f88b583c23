//! Process configuration, read once from the environment at startup.

use std::time::Duration;

use bankfeed_core::sync::{
    ClientCredentials, DriverSettings, SyncConfig, SYNC_TICK_INTERVAL_SECS,
    TOKEN_REFRESH_INTERVAL_MINUTES, UPSTREAM_CALL_TIMEOUT_SECS,
};
use bankfeed_truelayer::{DEFAULT_API_URL, DEFAULT_AUTH_URL};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub port: u16,
    pub data_dir: String,
    pub log_level: String,
    pub log_json: bool,
    pub auth_url: String,
    pub api_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: Option<String>,
    pub tick_interval: Duration,
    pub upstream_timeout: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let url = |name: &str, default: &str| {
            var(name)
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|| default.to_string())
        };
        let secs = |name: &str, default: u64| {
            var(name)
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(default))
        };

        Self {
            listen_addr: var("BANKFEED_LISTEN_ADDR")
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            port: var("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            data_dir: var("BANKFEED_DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
            log_level: var("BANKFEED_LOG").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_json: var("BANKFEED_LOG_JSON")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            auth_url: url("TRUELAYER_AUTH_URL", DEFAULT_AUTH_URL),
            api_url: url("TRUELAYER_API_URL", DEFAULT_API_URL),
            client_id: var("TRUELAYER_CLIENT_ID").unwrap_or_default(),
            client_secret: var("TRUELAYER_CLIENT_SECRET").unwrap_or_default(),
            redirect_url: var("TRUELAYER_REDIRECT_URL"),
            tick_interval: secs("BANKFEED_TICK_SECS", SYNC_TICK_INTERVAL_SECS),
            upstream_timeout: secs("BANKFEED_UPSTREAM_TIMEOUT_SECS", UPSTREAM_CALL_TIMEOUT_SECS),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.listen_addr, self.port)
    }

    /// Settings used while the store is still empty.
    pub fn default_settings(&self) -> DriverSettings {
        DriverSettings::with_defaults(
            ClientCredentials {
                client_id: self.client_id.clone(),
                client_secret: self.client_secret.clone(),
            },
            self.redirect_url.clone(),
        )
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            token_refresh_interval: chrono::Duration::minutes(TOKEN_REFRESH_INTERVAL_MINUTES),
            upstream_timeout: self.upstream_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.data_dir, "./data");
        assert_eq!(config.auth_url, "https://auth.truelayer.com");
        assert_eq!(config.api_url, "https://api.truelayer.com");
        assert_eq!(config.tick_interval, Duration::from_secs(60));
        assert_eq!(config.upstream_timeout, Duration::from_secs(60));
        assert!(!config.log_json);
        assert_eq!(config.redirect_url, None);
    }

    #[test]
    fn values_are_trimmed_and_validated() {
        let config = config_from(&[
            ("PORT", " 9090 "),
            ("TRUELAYER_API_URL", "http://localhost:3000/"),
            ("TRUELAYER_CLIENT_ID", "  id  "),
            ("TRUELAYER_REDIRECT_URL", "   "),
            ("BANKFEED_TICK_SECS", "0"),
            ("BANKFEED_UPSTREAM_TIMEOUT_SECS", "15"),
            ("BANKFEED_LOG_JSON", "TRUE"),
        ]);
        assert_eq!(config.port, 9090);
        assert_eq!(config.api_url, "http://localhost:3000");
        assert_eq!(config.client_id, "id");
        assert_eq!(config.redirect_url, None);
        assert_eq!(config.tick_interval, Duration::from_secs(60));
        assert_eq!(config.upstream_timeout, Duration::from_secs(15));
        assert!(config.log_json);
    }

    #[test]
    fn default_settings_carry_env_credentials() {
        let config = config_from(&[
            ("TRUELAYER_CLIENT_ID", "id"),
            ("TRUELAYER_CLIENT_SECRET", "secret"),
        ]);
        let settings = config.default_settings();
        assert!(settings.credentials().is_complete());
        assert_eq!(
            settings.redirect_url,
            bankfeed_core::sync::DEFAULT_REDIRECT_URL
        );
    }
}
