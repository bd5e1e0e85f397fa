//! Environment variable loading.

use std::env;
use std::str::FromStr;

use super::ServerConfig;

/// Read a variable, treating empty values as unset.
pub(super) fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a variable, falling back to `default` when unset.
pub(super) fn parse_env<T>(name: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| format!("Invalid value for {name} '{raw}': {e}").into()),
        None => Ok(default),
    }
}

/// Build a configuration from the process environment on top of defaults.
pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default();

    if let Some(host) = env_var("HOST") {
        config.host = host;
    }
    config.port = parse_env("PORT", config.port)?;
    if let Some(path) = env_var("RELAY_PATH") {
        config.relay_path = path;
    }

    config.openai_api_key = env_var("OPENAI_API_KEY");
    if let Some(url) = env_var("OPENAI_REALTIME_URL") {
        config.upstream_url = url;
    }
    if let Some(model) = env_var("OPENAI_REALTIME_MODEL") {
        config.default_model = model;
    }

    config.idle_timeout_secs = parse_env("IDLE_TIMEOUT_SECS", config.idle_timeout_secs)?;
    config.queue_limit = parse_env("RELAY_QUEUE_LIMIT", config.queue_limit)?;

    config.cors_allowed_origins = env_var("CORS_ALLOWED_ORIGINS");
    config.max_websocket_connections = match env_var("MAX_WEBSOCKET_CONNECTIONS") {
        Some(_) => Some(parse_env("MAX_WEBSOCKET_CONNECTIONS", 0usize)?),
        None => None,
    };
    config.max_connections_per_ip =
        parse_env("MAX_CONNECTIONS_PER_IP", config.max_connections_per_ip)?;

    Ok(config)
}
