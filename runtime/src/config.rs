use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application configuration.
///
/// `debug` widens unhandled-error responses to the full error chain;
/// `server_name` enables subdomain extraction from the Host header;
/// `strict_slashes` is the default slash behavior for rules registered
/// through [`App::route`](crate::App::route).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub debug: bool,
    pub server_name: Option<String>,
    pub strict_slashes: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            debug: false,
            server_name: None,
            strict_slashes: true,
        }
    }
}

impl AppConfig {
    /// Parse a config from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid application config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(!config.debug);
        assert!(config.server_name.is_none());
        assert!(config.strict_slashes);
    }

    #[test]
    fn test_from_toml() {
        let config = AppConfig::from_toml_str(
            r#"
            debug = true
            server_name = "example.com"
            "#,
        )
        .unwrap();
        assert!(config.debug);
        assert_eq!(config.server_name.as_deref(), Some("example.com"));
        assert!(config.strict_slashes);

        assert!(AppConfig::from_toml_str("debug = \"nope\"").is_err());
    }
}
