//! OpenAI Realtime API endpoint constants and helpers.

use url::Url;

use crate::core::realtime::base::{RealtimeError, RealtimeResult};

/// OpenAI Realtime API WebSocket endpoint.
pub const OPENAI_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Default model when none is configured.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview";

/// Default audio sample rate for OpenAI Realtime API.
pub const OPENAI_REALTIME_SAMPLE_RATE: u32 = 24000;

/// Default input/output audio format.
pub const DEFAULT_AUDIO_FORMAT: &str = "pcm16";

/// Build the WebSocket URL with the model query parameter.
///
/// An existing `model` parameter on `base` is replaced.
pub fn build_ws_url(base: &str, model: &str) -> RealtimeResult<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| RealtimeError::InvalidConfiguration(format!("invalid URL '{base}': {e}")))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(RealtimeError::InvalidConfiguration(format!(
                "unsupported URL scheme '{other}', expected ws or wss"
            )));
        }
    }

    let model = if model.is_empty() {
        DEFAULT_REALTIME_MODEL
    } else {
        model
    };

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "model")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair("model", model);

    Ok(url)
}

/// Convert a sample offset at the upstream sample rate into milliseconds.
#[inline]
pub fn samples_to_ms(samples: u64) -> u64 {
    samples * 1000 / OPENAI_REALTIME_SAMPLE_RATE as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_ws_url() {
        let url = build_ws_url(OPENAI_REALTIME_URL, "gpt-4o-mini-realtime-preview").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-mini-realtime-preview"
        );
    }

    #[test]
    fn test_build_ws_url_defaults_model() {
        let url = build_ws_url("ws://127.0.0.1:9000/v1/realtime", "").unwrap();
        assert_eq!(
            url.query(),
            Some(format!("model={DEFAULT_REALTIME_MODEL}").as_str())
        );
    }

    #[test]
    fn test_build_ws_url_replaces_model() {
        let url = build_ws_url("wss://example.com/rt?model=old&region=eu", "new").unwrap();
        assert_eq!(url.query(), Some("region=eu&model=new"));
    }

    #[test]
    fn test_build_ws_url_rejects_http() {
        assert!(matches!(
            build_ws_url("https://api.openai.com/v1/realtime", "m"),
            Err(RealtimeError::InvalidConfiguration(_))
        ));
        assert!(build_ws_url("not a url", "m").is_err());
    }

    #[test]
    fn test_samples_to_ms() {
        assert_eq!(samples_to_ms(24000), 1000);
        assert_eq!(samples_to_ms(4800), 200);
        assert_eq!(samples_to_ms(0), 0);
    }
}
