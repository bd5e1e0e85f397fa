//! Merging YAML overrides onto the environment configuration.

use super::ServerConfig;
use super::env;
use super::yaml::YamlConfig;

/// Load the environment configuration and apply `yaml` on top of it.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = env::load_from_env()?;

    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
    }

    if let Some(relay) = yaml.relay {
        if let Some(path) = relay.path {
            config.relay_path = path;
        }
        if let Some(secs) = relay.idle_timeout_secs {
            config.idle_timeout_secs = secs;
        }
        if let Some(limit) = relay.queue_limit {
            config.queue_limit = limit;
        }
    }

    if let Some(upstream) = yaml.upstream {
        if let Some(url) = upstream.url {
            config.upstream_url = url;
        }
        if let Some(model) = upstream.model {
            config.default_model = model;
        }
        if upstream.openai_api_key.is_some() {
            config.openai_api_key = upstream.openai_api_key;
        }
    }

    if let Some(security) = yaml.security {
        if security.cors_allowed_origins.is_some() {
            config.cors_allowed_origins = security.cors_allowed_origins;
        }
        if security.max_websocket_connections.is_some() {
            config.max_websocket_connections = security.max_websocket_connections;
        }
        if let Some(per_ip) = security.max_connections_per_ip {
            config.max_connections_per_ip = per_ip;
        }
    }

    Ok(config)
}
