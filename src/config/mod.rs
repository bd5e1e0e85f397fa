//! Configuration module for the relay server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use waav_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Relay listening on {}{}", config.address(), config.relay_path);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::queue::DEFAULT_QUEUE_LIMIT;
use crate::core::realtime::RealtimeConfig;
use crate::core::realtime::openai::{DEFAULT_REALTIME_MODEL, OPENAI_REALTIME_URL};

/// Default path of the relay WebSocket endpoint
pub const DEFAULT_RELAY_PATH: &str = "/relay";

/// Default idle timeout for relay sessions (5 minutes)
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Default per-IP connection cap
pub const DEFAULT_MAX_CONNECTIONS_PER_IP: u32 = 100;

/// Server configuration
///
/// Contains all configuration needed to run the relay:
/// - Server settings (host, port, relay endpoint path)
/// - Upstream settings (OpenAI Realtime endpoint, default model, API key)
/// - Session settings (idle timeout, pre-connect queue limit)
/// - Security settings (CORS, connection limits)
#[derive(Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    /// Path of the duplex relay endpoint, e.g. "/relay"
    pub relay_path: String,

    // Upstream settings
    /// OpenAI API key. Held by the server only; never accepted from clients.
    pub openai_api_key: Option<String>,
    /// Upstream Realtime WebSocket endpoint
    pub upstream_url: String,
    /// Model used when the upstream URL does not name one
    pub default_model: String,

    // Session settings
    /// Seconds without client traffic before a session is closed
    pub idle_timeout_secs: u64,
    /// Commands held per session while the upstream connects
    pub queue_limit: usize,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Connection limits
    /// Maximum concurrent relay sessions
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum relay sessions per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            relay_path: DEFAULT_RELAY_PATH.to_string(),
            openai_api_key: None,
            upstream_url: OPENAI_REALTIME_URL.to_string(),
            default_model: DEFAULT_REALTIME_MODEL.to_string(),
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            queue_limit: DEFAULT_QUEUE_LIMIT,
            cors_allowed_origins: None,
            max_websocket_connections: None,
            max_connections_per_ip: DEFAULT_MAX_CONNECTIONS_PER_IP,
        }
    }
}

/// Zeroize the upstream credential when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("relay_path", &self.relay_path)
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("upstream_url", &self.upstream_url)
            .field("default_model", &self.default_model)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("queue_limit", &self.queue_limit)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("max_websocket_connections", &self.max_websocket_connections)
            .field("max_connections_per_ip", &self.max_connections_per_ip)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// The `.env` file is loaded by `main.rs` before this is called, so values
    /// from it are visible here unless overridden by the real environment.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = env::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_relay_path(&self.relay_path)?;
        validation::validate_upstream_url(&self.upstream_url)?;
        validation::validate_queue_limit(self.queue_limit)?;
        validation::validate_idle_timeout(self.idle_timeout_secs)?;
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Upstream settings shared by every relay session.
    ///
    /// A missing API key yields an empty key, which the provider rejects
    /// when a client asks to connect.
    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            api_key: self.openai_api_key.clone().unwrap_or_default(),
            url: self.upstream_url.clone(),
            model: self.default_model.clone(),
            session: None,
            tools: Vec::new(),
        }
    }
}
