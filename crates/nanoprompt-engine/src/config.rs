use std::env;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TEXT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image-preview";

/// Settings for talking to Gemini, resolved once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub text_model: String,
    pub image_model: String,
    pub request_timeout_s: f64,
    pub transport_retries: usize,
    pub retry_backoff_s: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            request_timeout_s: 90.0,
            transport_retries: 2,
            retry_backoff_s: 1.2,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup. Blank values count as unset and
    /// numeric settings are clamped to sane ranges.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();
        Self {
            api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")),
            api_base: get("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or(defaults.api_base),
            text_model: get("NANOPROMPT_TEXT_MODEL").unwrap_or(defaults.text_model),
            image_model: get("NANOPROMPT_IMAGE_MODEL").unwrap_or(defaults.image_model),
            request_timeout_s: parse_clamped(
                get("NANOPROMPT_REQUEST_TIMEOUT"),
                defaults.request_timeout_s,
                5.0,
                300.0,
            ),
            transport_retries: parse_clamped(
                get("NANOPROMPT_TRANSPORT_RETRIES"),
                defaults.transport_retries as f64,
                0.0,
                4.0,
            )
            .round() as usize,
            retry_backoff_s: parse_clamped(
                get("NANOPROMPT_RETRY_BACKOFF"),
                defaults.retry_backoff_s,
                0.0,
                10.0,
            ),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

fn parse_clamped(raw: Option<String>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{EngineConfig, DEFAULT_API_BASE, DEFAULT_TEXT_MODEL};

    fn config(pairs: &[(&str, &str)]) -> EngineConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = config(&[]);
        assert_eq!(config, EngineConfig::default());
        assert!(!config.has_api_key());
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.text_model, DEFAULT_TEXT_MODEL);
    }

    #[test]
    fn gemini_key_wins_over_google_key_and_blanks_are_ignored() {
        let both = config(&[("GEMINI_API_KEY", "g-key"), ("GOOGLE_API_KEY", "o-key")]);
        assert_eq!(both.api_key.as_deref(), Some("g-key"));
        let blank = config(&[("GEMINI_API_KEY", "  "), ("GOOGLE_API_KEY", "o-key")]);
        assert_eq!(blank.api_key.as_deref(), Some("o-key"));
    }

    #[test]
    fn base_url_is_trimmed_and_numbers_are_clamped() {
        let config = config(&[
            ("GEMINI_API_BASE", "http://localhost:9999/v1beta/"),
            ("NANOPROMPT_REQUEST_TIMEOUT", "1000"),
            ("NANOPROMPT_TRANSPORT_RETRIES", "nope"),
            ("NANOPROMPT_RETRY_BACKOFF", "-3"),
        ]);
        assert_eq!(config.api_base, "http://localhost:9999/v1beta");
        assert_eq!(config.request_timeout_s, 300.0);
        assert_eq!(config.transport_retries, 2);
        assert_eq!(config.retry_backoff_s, 0.0);
    }
}
