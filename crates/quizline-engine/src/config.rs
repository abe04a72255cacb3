//! Configuration for the Quizline engine.
//!
//! Controls the store location, the external endpoints, per-request timeout
//! bounds, and the reconciliation cadence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QuizError, Result};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "quizline.json";

/// Inclusive bounds for the per-request timeout, in seconds.
const TIMEOUT_RANGE_SECS: (u64, u64) = (10, 30);

/// Default database path.
fn default_database_path() -> String {
    "quizline.db".to_string()
}

/// Default base URL for the assessment backend.
fn default_assess_base_url() -> String {
    "http://localhost:8088".to_string()
}

/// Default URL for the re-engagement endpoint.
fn default_engage_url() -> String {
    "http://localhost:8077/nudge".to_string()
}

/// Default per-request timeout in seconds.
const fn default_request_timeout() -> u64 {
    15
}

/// Default reconciliation tick interval in seconds.
const fn default_tick_interval() -> u64 {
    60
}

/// Default secret feeding the deterministic password derivation.
fn default_credential_secret() -> String {
    "quizline-dev-secret".to_string()
}

/// Default product code for paid-test/order creation.
fn default_product_code() -> String {
    "paid-test".to_string()
}

/// Main configuration for the Quizline engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Base URL of the external assessment system.
    #[serde(default = "default_assess_base_url")]
    pub assess_base_url: String,

    /// URL of the re-engagement endpoint.
    #[serde(default = "default_engage_url")]
    pub engage_url: String,

    /// Per-request timeout for external calls, in seconds (10–30).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Reconciliation tick interval in seconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Secret feeding the deterministic password derivation for credential
    /// exchange.
    #[serde(default = "default_credential_secret")]
    pub credential_secret: String,

    /// Product code submitted to the order-creation endpoint.
    #[serde(default = "default_product_code")]
    pub product_code: String,

    /// When `true`, the settlement pipeline skips order creation entirely.
    #[serde(default)]
    pub skip_order_creation: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            assess_base_url: default_assess_base_url(),
            engage_url: default_engage_url(),
            request_timeout_secs: default_request_timeout(),
            tick_interval_secs: default_tick_interval(),
            credential_secret: default_credential_secret(),
            product_code: default_product_code(),
            skip_order_creation: false,
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `quizline.json` in the current directory. If found, loads
    /// and validates the configuration. If not found, returns defaults.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            QuizError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        Self::load_from_file(&config_path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration. If the file
    /// exists but contains invalid JSON, returns an error.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(QuizError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| QuizError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// The per-request timeout is bounded so a stalled external dependency
    /// cannot hang a worker; everything else just has to be non-empty.
    pub fn validate(&self) -> Result<()> {
        let (min, max) = TIMEOUT_RANGE_SECS;
        if self.request_timeout_secs < min || self.request_timeout_secs > max {
            return Err(QuizError::config_validation(
                format!(
                    "requestTimeoutSecs must be between {min} and {max}, got {}",
                    self.request_timeout_secs
                ),
                format!("Set requestTimeoutSecs between {min} and {max} in your quizline.json"),
            ));
        }

        if self.tick_interval_secs == 0 {
            return Err(QuizError::config_validation(
                "tickIntervalSecs must be greater than 0",
                "Set tickIntervalSecs to at least 1 second in your quizline.json",
            ));
        }

        if self.database_path.trim().is_empty() {
            return Err(QuizError::config_validation(
                "databasePath must not be empty",
                "Provide a valid database file path in your quizline.json",
            ));
        }

        if self.assess_base_url.trim().is_empty() {
            return Err(QuizError::config_validation(
                "assessBaseUrl must not be empty",
                "Provide the assessment backend base URL in your quizline.json",
            ));
        }

        if self.engage_url.trim().is_empty() {
            return Err(QuizError::config_validation(
                "engageUrl must not be empty",
                "Provide the re-engagement endpoint URL in your quizline.json",
            ));
        }

        if self.credential_secret.trim().is_empty() {
            return Err(QuizError::config_validation(
                "credentialSecret must not be empty",
                "Provide a credential secret in your quizline.json",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.request_timeout_secs, 15);
        assert_eq!(config.tick_interval_secs, 60);
        assert!(!config.skip_order_creation);
    }

    #[test]
    fn test_missing_file_returns_defaults() {
        let config = Config::load_from_file(Path::new("/nonexistent/quizline.json")).unwrap();
        assert_eq!(config.database_path, "quizline.db");
    }

    #[test]
    fn test_camel_case_fields_deserialize() {
        let json = r#"{
            "databasePath": "/var/lib/quizline/quiz.db",
            "assessBaseUrl": "http://assess.internal",
            "requestTimeoutSecs": 20,
            "skipOrderCreation": true
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.database_path, "/var/lib/quizline/quiz.db");
        assert_eq!(config.assess_base_url, "http://assess.internal");
        assert_eq!(config.request_timeout_secs, 20);
        assert!(config.skip_order_creation);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.tick_interval_secs, 60);
    }

    #[test]
    fn test_timeout_out_of_range_rejected() {
        let mut config = Config::default();
        config.request_timeout_secs = 5;
        assert!(matches!(
            config.validate(),
            Err(QuizError::ConfigValidationError { .. })
        ));

        config.request_timeout_secs = 31;
        assert!(config.validate().is_err());

        config.request_timeout_secs = 10;
        assert!(config.validate().is_ok());
        config.request_timeout_secs = 30;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_secret_rejected() {
        let mut config = Config::default();
        config.credential_secret = "  ".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("credentialSecret"));
    }

    #[test]
    fn test_invalid_json_reports_path() {
        let dir = std::env::temp_dir().join("quizline-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ not json").unwrap();

        let err = Config::load_from_dir(&dir).unwrap_err();
        assert!(matches!(err, QuizError::ConfigParseError { .. }));
        assert!(err.to_string().contains("quizline.json"));

        std::fs::remove_file(&path).unwrap();
    }
}
