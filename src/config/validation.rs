//! Configuration validation.

use crate::core::realtime::openai::build_ws_url;
use crate::routes::api::RESERVED_PATHS;

pub(super) fn validate_relay_path(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.starts_with('/') {
        return Err(format!("Relay path '{path}' must start with '/'").into());
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err(format!("Relay path '{path}' must not end with '/'").into());
    }
    if RESERVED_PATHS.contains(&path) {
        return Err(format!("Relay path '{path}' is already served by the HTTP API").into());
    }
    Ok(())
}

pub(super) fn validate_upstream_url(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    build_ws_url(url, "")
        .map(|_| ())
        .map_err(|e| format!("Invalid upstream URL: {e}").into())
}

pub(super) fn validate_queue_limit(limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    if limit == 0 {
        return Err("Relay queue limit must be greater than zero".into());
    }
    Ok(())
}

pub(super) fn validate_idle_timeout(secs: u64) -> Result<(), Box<dyn std::error::Error>> {
    if secs == 0 {
        return Err("Idle timeout must be greater than zero".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_path() {
        assert!(validate_relay_path("/relay").is_ok());
        assert!(validate_relay_path("/v1/voice").is_ok());
        assert!(validate_relay_path("/").is_err());
        assert!(validate_relay_path("/stats").is_err());
        assert!(validate_relay_path("relay").is_err());
        assert!(validate_relay_path("/relay/").is_err());
        assert!(validate_relay_path("").is_err());
    }

    #[test]
    fn test_upstream_url() {
        assert!(validate_upstream_url("wss://api.openai.com/v1/realtime").is_ok());
        assert!(validate_upstream_url("ws://127.0.0.1:9000").is_ok());
        assert!(validate_upstream_url("https://api.openai.com").is_err());
    }

    #[test]
    fn test_limits() {
        assert!(validate_queue_limit(1).is_ok());
        assert!(validate_queue_limit(0).is_err());
        assert!(validate_idle_timeout(0).is_err());
    }
}
