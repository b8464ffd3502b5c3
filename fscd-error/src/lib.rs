//! Unified error handling for fscd
//!
//! This crate provides the single error type used by the fan control library.
//! It uses thiserror for Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using FscError
pub type Result<T> = std::result::Result<T, FscError>;

/// Unified error type for all fscd operations
#[derive(thiserror::Error, Debug)]
pub enum FscError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Hardware Access Errors
    // ============================================================================
    #[error("Failed to read sensor {name}: {reason}")]
    SensorRead {
        name: String,
        reason: String,
    },

    #[error("Sensor {0} reported no reading")]
    SensorUnavailable(String),

    #[error("Failed to read fan tach {name}: {reason}")]
    FanRead {
        name: String,
        reason: String,
    },

    #[error("Failed to read PWM from {path}: {reason}")]
    PwmRead {
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to write PWM to {target}: {reason}")]
    PwmWrite {
        target: String,
        reason: String,
    },

    // ============================================================================
    // External Command Errors
    // ============================================================================
    #[error("Command `{command}` failed: {reason}")]
    Command {
        command: String,
        reason: String,
    },

    #[error("Command `{command}` timed out after {timeout_ms} ms")]
    CommandTimeout {
        command: String,
        timeout_ms: u64,
    },

    #[error("Failed to parse {what}: {reason}")]
    Parse {
        what: String,
        reason: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ============================================================================
    // Capability Errors
    // ============================================================================
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl FscError {
    /// Create an invalid config error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a sensor read error
    pub fn sensor_read(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SensorRead {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a command failure error
    pub fn command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Create a parse error
    pub fn parse(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// True for errors raised while loading or validating configuration.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::JsonParse(_)
                | Self::InvalidConfig { .. }
                | Self::MissingConfig(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let err = FscError::invalid_config("zones.zone_1.pwm_output", "no fans listed");
        assert_eq!(
            err.to_string(),
            "Invalid configuration value for zones.zone_1.pwm_output: no fans listed"
        );
        assert!(err.is_config());
    }

    #[test]
    fn test_timeout_display() {
        let err = FscError::CommandTimeout {
            command: "sensor-util mb".to_string(),
            timeout_ms: 5000,
        };
        assert_eq!(err.to_string(), "Command `sensor-util mb` timed out after 5000 ms");
        assert!(!err.is_config());
    }

    #[test]
    fn test_json_error_is_config() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: FscError = json_err.into();
        assert!(err.is_config());
    }

    #[test]
    fn test_missing_config_is_config() {
        let err = FscError::MissingConfig("zones".to_string());
        assert_eq!(err.to_string(), "Missing required configuration: zones");
        assert!(err.is_config());
        assert!(!FscError::NotSupported("read-back".to_string()).is_config());
    }
}
