//! Error types for the CONNACK probe.

use thiserror::Error;

/// Error type for probe operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration value rejected by validation.
    #[error("connack: invalid config: {0}")]
    InvalidConfig(String),

    /// Config file extension is not json, yaml or yml.
    #[error("connack: unsupported config format: {0}")]
    UnsupportedConfigFormat(String),

    /// Client handle could not be created.
    #[error("connack: acquire client handle: {0}")]
    Acquire(String),

    /// Some attempts received no CONNACK.
    #[error("connack: {failed} of {total} attempts received no CONNACK")]
    MissingConnAck { failed: usize, total: usize },

    /// Tally does not cover every attempt.
    #[error("connack: {accounted} of {expected} attempts accounted for")]
    Unaccounted { accounted: usize, expected: usize },

    /// JSON error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for probe operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::MissingConnAck { failed: 3, total: 10 };
        assert_eq!(
            err.to_string(),
            "connack: 3 of 10 attempts received no CONNACK"
        );

        let err = Error::InvalidConfig("port must not be 0".to_string());
        assert!(err.to_string().contains("port must not be 0"));
    }
}
