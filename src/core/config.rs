//! Engine configuration, loadable from RON with an environment overlay.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON deserialization error: {0}")]
    Ron(#[from] ron::error::SpannedError),
}

/// Prefix of environment variables exposed to generator URL templates.
pub const CONST_ENV_PREFIX: &str = "MORTAR_CONST_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Locale used when a request names none, and as the bubbling fallback.
    pub default_locale: String,
    /// Rendered in place of a placeholder whose variable is absent.
    pub missing_marker: String,
    /// Returned by the stand-in for a malformed formatter.
    pub fallback_marker: String,
    /// Ceiling on in-flight generator fetches across the whole process.
    pub max_concurrent_fetches: usize,
    /// Per-fetch timeout. Upstream aggregate queries can be very slow.
    pub fetch_timeout_secs: u64,
    /// Prefixed to generator URLs that are not absolute.
    pub origin: Option<String>,
    /// Extra values for `<key>` placeholders in generator URLs.
    pub constants: HashMap<String, String>,
    /// Script operation budget; 0 leaves scripts unbounded.
    pub max_operations: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_locale: "en".to_string(),
            missing_marker: "N/A".to_string(),
            fallback_marker: "N/A".to_string(),
            max_concurrent_fetches: 10,
            fetch_timeout_secs: 30 * 60,
            origin: None,
            constants: HashMap::new(),
            max_operations: 0,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a RON file.
    pub fn load_from_ron(path: &Path) -> Result<EngineConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_ron(&contents)
    }

    /// Parse a configuration from a RON string. Omitted fields keep defaults.
    pub fn parse_ron(input: &str) -> Result<EngineConfig, ConfigError> {
        Ok(ron::from_str(input)?)
    }

    /// Overlay `MORTAR_LANGUAGE_DEFAULT`, `MORTAR_ORIGIN` and every
    /// `MORTAR_CONST_<NAME>` from the process environment.
    pub fn with_env(self) -> EngineConfig {
        self.with_vars(std::env::vars())
    }

    fn with_vars<I>(mut self, vars: I) -> EngineConfig
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if key == "MORTAR_LANGUAGE_DEFAULT" {
                self.default_locale = value;
            } else if key == "MORTAR_ORIGIN" {
                self.origin = Some(value);
            } else if let Some(name) = key.strip_prefix(CONST_ENV_PREFIX) {
                if !name.is_empty() {
                    self.constants.insert(name.to_string(), value);
                }
            }
        }
        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_locale, "en");
        assert_eq!(config.max_concurrent_fetches, 10);
        assert_eq!(config.fetch_timeout(), Duration::from_secs(1800));
        assert_eq!(config.missing_marker, "N/A");
    }

    #[test]
    fn partial_ron_keeps_defaults() {
        let config = EngineConfig::parse_ron(
            r#"(default_locale: "es", constants: {"CUBE": "https://cube.example"})"#,
        )
        .unwrap();
        assert_eq!(config.default_locale, "es");
        assert_eq!(config.constants["CUBE"], "https://cube.example");
        assert_eq!(config.max_concurrent_fetches, 10);
    }

    #[test]
    fn env_overlay() {
        let config = EngineConfig::default().with_vars(vec![
            ("MORTAR_LANGUAGE_DEFAULT".to_string(), "pt".to_string()),
            ("MORTAR_CONST_YEAR".to_string(), "2017".to_string()),
            ("MORTAR_CONST_".to_string(), "ignored".to_string()),
            ("PATH".to_string(), "/bin".to_string()),
        ]);
        assert_eq!(config.default_locale, "pt");
        assert_eq!(config.constants.get("YEAR").map(String::as_str), Some("2017"));
        assert_eq!(config.constants.len(), 1);
    }

    #[test]
    fn bad_ron_is_an_error() {
        assert!(EngineConfig::parse_ron("(default_locale: 3)").is_err());
    }
}
