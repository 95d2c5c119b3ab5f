//! Store configuration.
//!
//! [`StoreConfig`] holds the limits and policy switches shared by every
//! backend. It can be built in code, deserialized from JSON with every field
//! optional, or loaded from a file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or checking configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config from '{path}': {message}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying error text.
        message: String,
    },

    /// The configuration file is not valid JSON for this type.
    #[error("invalid config in '{path}': {message}")]
    Parse {
        /// Path of the file.
        path: String,
        /// Underlying error text.
        message: String,
    },

    /// A field holds a value outside its allowed range.
    #[error("invalid value for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Policy and limits for the resource store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Absolute base URL of this server. Absolute references starting with
    /// it are resolved as local references.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Page size used when a query does not set `_count`.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,

    /// Hard upper bound on page size.
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,

    /// Maximum number of resources returned by include retrieval.
    #[serde(default = "default_include_limit")]
    pub include_limit: u32,

    /// Maximum number of tags returned for one resource version.
    #[serde(default = "default_tag_list_limit")]
    pub tag_list_limit: u32,

    /// Reject deletes of resources that live resources still refer to.
    #[serde(default = "default_true")]
    pub enforce_referential_integrity_on_delete: bool,

    /// Run the validator's content rules on create and update.
    #[serde(default = "default_true")]
    pub validate_on_write: bool,

    /// Pattern a client-supplied forced id must match.
    #[serde(default = "default_forced_id_pattern")]
    pub forced_id_pattern: String,
}

fn default_page_size() -> u32 {
    20
}

fn default_max_page_size() -> u32 {
    1000
}

fn default_include_limit() -> u32 {
    2000
}

fn default_tag_list_limit() -> u32 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_forced_id_pattern() -> String {
    r"^[A-Za-z0-9\-\.]{1,64}$".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            include_limit: default_include_limit(),
            tag_list_limit: default_tag_list_limit(),
            enforce_referential_integrity_on_delete: true,
            validate_on_write: true,
            forced_id_pattern: default_forced_id_pattern(),
        }
    }
}

impl StoreConfig {
    /// Loads configuration from a JSON file and validates it.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    /// Sets the default page size.
    pub fn with_default_page_size(mut self, size: u32) -> Self {
        self.default_page_size = size;
        self
    }

    /// Sets the include limit.
    pub fn with_include_limit(mut self, limit: u32) -> Self {
        self.include_limit = limit;
        self
    }

    /// Enables or disables delete-time referential integrity checks.
    pub fn with_referential_integrity(mut self, enforce: bool) -> Self {
        self.enforce_referential_integrity_on_delete = enforce;
        self
    }

    /// Enables or disables validation on create and update.
    pub fn with_validate_on_write(mut self, validate: bool) -> Self {
        self.validate_on_write = validate;
        self
    }

    /// Checks the configuration for out-of-range values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_page_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_page_size".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::InvalidValue {
                field: "default_page_size".to_string(),
                message: format!("must be between 1 and {}", self.max_page_size),
            });
        }
        if let Err(e) = regex::Regex::new(&self.forced_id_pattern) {
            return Err(ConfigError::InvalidValue {
                field: "forced_id_pattern".to_string(),
                message: e.to_string(),
            });
        }
        if let Some(base_url) = &self.base_url {
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(ConfigError::InvalidValue {
                    field: "base_url".to_string(),
                    message: "must be an absolute http(s) URL".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns the effective page size for a requested `_count`.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_page_size)
            .min(self.max_page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.default_page_size, 20);
        assert_eq!(config.max_page_size, 1000);
        assert_eq!(config.include_limit, 2000);
        assert!(config.enforce_referential_integrity_on_delete);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"base_url": "http://example.com/fhir", "max_page_size": 50}"#)
                .unwrap();
        assert_eq!(config.max_page_size, 50);
        assert_eq!(config.default_page_size, 20);
        assert!(config.validate_on_write);
    }

    #[test]
    fn test_page_size_clamped() {
        let config = StoreConfig::default();
        assert_eq!(config.page_size(None), 20);
        assert_eq!(config.page_size(Some(5)), 5);
        assert_eq!(config.page_size(Some(50_000)), 1000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = StoreConfig::default().with_default_page_size(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "default_page_size"
        ));

        let config = StoreConfig::default().with_base_url("ftp://example.com");
        assert!(config.validate().is_err());

        let config = StoreConfig {
            forced_id_pattern: "([".to_string(),
            ..StoreConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "forced_id_pattern"
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"include_limit": 10, "validate_on_write": false}}"#).unwrap();

        let config = StoreConfig::from_file(file.path()).unwrap();
        assert_eq!(config.include_limit, 10);
        assert!(!config.validate_on_write);

        assert!(matches!(
            StoreConfig::from_file("/nonexistent/store.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
