//! Configuration module for api-devtools
//!
//! Supports configuration via file and environment variables.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "devtools.toml";

/// Capture proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Host to bind the proxy to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    /// Origin to forward requests to (scheme://host[:port])
    #[serde(default)]
    pub target: Option<String>,
    /// Seconds to wait on an unresponsive origin
    #[serde(default = "default_timeout_secs")]
    pub upstream_timeout_secs: u64,
    /// Maximum number of records retained in memory (unbounded when unset)
    #[serde(default)]
    pub max_records: Option<usize>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_proxy_port() -> u16 {
    8888
}

fn default_inspect_port() -> u16 {
    8889
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_proxy_port(),
            target: None,
            upstream_timeout_secs: default_timeout_secs(),
            max_records: None,
        }
    }
}

impl ProxyConfig {
    /// Configured target, ignoring blank values
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// Direct request runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Overall request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Saved request storage configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// Path of the JSON file (defaults to ~/.api-devtools/requests.json)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Inspection API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectConfig {
    /// Whether to serve the inspection API next to the proxy
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_inspect_port")]
    pub port: u16,
}

impl Default for InspectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_inspect_port(),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub inspect: InspectConfig,
}

impl AppConfig {
    /// Load configuration from defaults, `devtools.toml` and the environment
    pub fn load() -> anyhow::Result<Self> {
        // Try to load .env file (ignore if not found)
        let _ = dotenvy::dotenv();

        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&AppConfig::default())?);

        if std::path::Path::new(DEFAULT_CONFIG_FILE).exists() {
            config = config.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));
        }

        // API_DEVTOOLS_PROXY__PORT=9000 overrides proxy.port
        config = config.add_source(
            config::Environment::with_prefix("API_DEVTOOLS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = config.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        Ok(app_config)
    }

    /// Load configuration from a specific TOML (or JSON) file
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).or_else(|_| serde_json::from_str(&contents))?;
        Ok(config)
    }
}

/// Shared application state that holds runtime configuration
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<AppConfig>>,
}

impl SharedConfig {
    /// Create a new shared configuration
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Get a read-only copy of the configuration
    pub fn get(&self) -> AppConfig {
        self.inner.read().clone()
    }

    /// Update the proxy configuration
    pub fn update_proxy(&self, proxy: ProxyConfig) {
        self.inner.write().proxy = proxy;
    }

    /// Update the entire configuration
    pub fn update(&self, config: AppConfig) {
        *self.inner.write() = config;
    }
}
