use crate::vstorage::WatcherConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub watcher: WatcherSettings,
    #[serde(default)]
    pub valkey: ValkeyConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    /// Tendermint RPC endpoint. When unset, the first `rpcAddrs` entry of
    /// the network config is used.
    #[serde(default)]
    pub url: Option<String>,
    /// Published network config (`{ chainName, rpcAddrs }`)
    #[serde(default = "default_network_config_url")]
    pub network_config_url: String,
    /// Per-request HTTP timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherSettings {
    /// Delay before polling a newly watched path
    #[serde(default = "default_new_path_query_delay_ms")]
    pub new_path_query_delay_ms: u64,
    #[serde(default = "default_refresh_lower_bound_ms")]
    pub refresh_lower_bound_ms: u64,
    #[serde(default = "default_refresh_upper_bound_ms")]
    pub refresh_upper_bound_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValkeyConfig {
    /// Use Valkey for persistence (false = in-memory store).
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_valkey_url")]
    pub url: String,
    /// Key prefix for every stored record
    #[serde(default = "default_valkey_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Send alerts through Mailgun (false = log only).
    #[serde(default)]
    pub enabled: bool,
    /// Mailgun API key - loaded from env EMAIL_API_KEY
    #[serde(default)]
    pub api_key: String,
    /// Mailgun sending domain
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_email_from")]
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_network_config_url() -> String {
    "https://main.agoric.net/network-config".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_new_path_query_delay_ms() -> u64 {
    20
}
fn default_refresh_lower_bound_ms() -> u64 {
    2_000
}
fn default_refresh_upper_bound_ms() -> u64 {
    4_000
}
fn default_valkey_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_valkey_prefix() -> String {
    "vault-alerts".to_string()
}
fn default_email_from() -> String {
    "Inter Vault Alerts <alerts@inter.trade>".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: None,
            network_config_url: default_network_config_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            new_path_query_delay_ms: default_new_path_query_delay_ms(),
            refresh_lower_bound_ms: default_refresh_lower_bound_ms(),
            refresh_upper_bound_ms: default_refresh_upper_bound_ms(),
        }
    }
}

impl Default for ValkeyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_valkey_url(),
            prefix: default_valkey_prefix(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            domain: String::new(),
            from: default_email_from(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables for secrets.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;

        // Secrets come from the environment, never the config file
        if let Ok(key) = std::env::var("EMAIL_API_KEY") {
            config.email.api_key = key;
        }

        config.validate()?;
        Ok(config)
    }

    fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load a default config with env-only overrides (no file needed).
    pub fn from_env() -> Result<Self, ConfigError> {
        let env_bool = |name: &str| {
            std::env::var(name)
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false)
        };

        let config = Config {
            rpc: RpcConfig {
                url: std::env::var("VSTORAGE_RPC_URL").ok(),
                network_config_url: std::env::var("NETWORK_CONFIG_URL")
                    .unwrap_or_else(|_| default_network_config_url()),
                ..RpcConfig::default()
            },
            watcher: WatcherSettings::default(),
            valkey: ValkeyConfig {
                enabled: env_bool("VALKEY_ENABLED"),
                url: std::env::var("VALKEY_URL").unwrap_or_else(|_| default_valkey_url()),
                prefix: default_valkey_prefix(),
            },
            email: EmailConfig {
                enabled: env_bool("EMAIL_ENABLED"),
                api_key: std::env::var("EMAIL_API_KEY").unwrap_or_default(),
                domain: std::env::var("EMAIL_DOMAIN").unwrap_or_default(),
                from: std::env::var("EMAIL_FROM").unwrap_or_else(|_| default_email_from()),
            },
            logging: LoggingConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.watcher;
        if w.refresh_lower_bound_ms > w.refresh_upper_bound_ms {
            return Err(ConfigError::Invalid(format!(
                "watcher.refresh_lower_bound_ms ({}) exceeds refresh_upper_bound_ms ({})",
                w.refresh_lower_bound_ms, w.refresh_upper_bound_ms
            )));
        }
        if self.rpc.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "rpc.request_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn has_email_credentials(&self) -> bool {
        !self.email.api_key.is_empty() && !self.email.domain.is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc.request_timeout_ms)
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            new_path_query_delay: Duration::from_millis(self.watcher.new_path_query_delay_ms),
            refresh_lower_bound: Duration::from_millis(self.watcher.refresh_lower_bound_ms),
            refresh_upper_bound: Duration::from_millis(self.watcher.refresh_upper_bound_ms),
        }
    }
}
