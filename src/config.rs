//! Configuration module for Partwise
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation of upload tuning knobs.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// S3 minimum part size (5MB). Smaller parts are rejected by the store
/// for every part except the last.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Largest object a single PutObject request can carry (5GB).
pub const MAX_SINGLE_SHOT_SIZE: u64 = 5 * 1024 * 1024 * 1024;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
fn expand_env_vars(s: &str) -> String {
    // Regex to capture ${VAR} or ${VAR:-default}
    let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}").unwrap();
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let full_match = cap.get(0).unwrap();
        let var_name = cap.get(1).unwrap().as_str();

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name) {
            Ok(val) => val,
            Err(_) => {
                if let Some(default) = cap.get(2) {
                    default.as_str().to_string()
                } else {
                    // No env var and no default. Keep the original placeholder.
                    full_match.as_str().to_string()
                }
            }
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

/// Custom deserializer for optional strings with environment variable
/// expansion, used for credential and endpoint fields.
fn deserialize_opt_with_env<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.map(|s| expand_env_vars(&s)))
}

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub s3: S3Config,
    #[serde(default)]
    pub upload: UploadConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.s3.bucket.trim().is_empty() {
            return Err(ConfigError::ValidationError("Bucket cannot be empty".into()));
        }

        if self.s3.region.trim().is_empty() {
            return Err(ConfigError::ValidationError("Region cannot be empty".into()));
        }

        if let Some(ref endpoint) = self.s3.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
        }

        if self.upload.part_size < MIN_PART_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "Part size {} is below the 5MB S3 minimum",
                self.upload.part_size
            )));
        }

        if self.upload.single_shot_threshold > MAX_SINGLE_SHOT_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "Single-shot threshold {} exceeds the 5GB PutObject limit",
                self.upload.single_shot_threshold
            )));
        }

        Ok(())
    }
}

/// S3 backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    #[serde(default, deserialize_with = "deserialize_opt_with_env")]
    pub endpoint: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_with_env")]
    pub access_key: Option<String>,
    #[serde(default, deserialize_with = "deserialize_opt_with_env")]
    pub secret_key: Option<String>,
}

/// Upload tuning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Files up to this size (inclusive) go through a single PutObject
    /// request; larger files use the multipart protocol.
    #[serde(default = "default_single_shot_threshold")]
    pub single_shot_threshold: u64,

    /// Size of each multipart range; the final part carries the remainder.
    #[serde(default = "default_part_size")]
    pub part_size: u64,

    /// Issue a best-effort AbortMultipartUpload when a part or the
    /// completion call fails. Off by default: abandoned sessions are left
    /// to the store's lifecycle rules.
    #[serde(default)]
    pub abort_on_failure: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            single_shot_threshold: default_single_shot_threshold(),
            part_size: default_part_size(),
            abort_on_failure: false,
        }
    }
}

fn default_single_shot_threshold() -> u64 {
    MAX_SINGLE_SHOT_SIZE // 5GB
}

fn default_part_size() -> u64 {
    20 * 1024 * 1024 // 20MB
}
