//! Error types and handling for Hestia
//!
//! This module defines the error types used throughout the plugin runtime.
//! Errors fall into four groups: setup errors raised while resolving a
//! plugin configuration, transient backend errors surfaced on every access,
//! domain sentinels reported by devices, and composition errors.

use thiserror::Error;

/// Result type alias for Hestia operations
pub type Result<T> = std::result::Result<T, HestiaError>;

/// Main error type for Hestia
#[derive(Debug, Clone, Error)]
pub enum HestiaError {
    /// A plugin configuration without `source`
    #[error("missing plugin source")]
    MissingSource,

    /// A `source` that no factory is registered for
    #[error("unknown plugin source: {name}")]
    UnknownSource { name: String },

    /// A plugin was asked for a capability it does not implement
    #[error("{plugin}: plugin does not implement {capability}")]
    Unsupported { plugin: String, capability: String },

    /// Two factories registered under the same name
    #[error("duplicate plugin source: {name}")]
    DuplicatePlugin { name: String },

    /// The plugin cannot run on this platform or build
    #[error("{component}: unsupported platform")]
    UnsupportedPlatform { component: String },

    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Modbus communication errors
    #[error("Modbus error: {message}")]
    Modbus { message: String },

    /// MQTT broker errors
    #[error("MQTT error: {message}")]
    Mqtt { message: String },

    /// SNMP agent errors
    #[error("SNMP error: {message}")]
    Snmp { message: String },

    /// Non-success HTTP responses
    #[error("unexpected status: {status} ({message})")]
    Http { status: u16, message: String },

    /// Network-related errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Timeout errors
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Device is asleep, retry later
    #[error("vehicle not reachable (asleep)")]
    Asleep,

    /// Device asked to retry the request
    #[error("must retry")]
    MustRetry,

    /// Requested value is not available from the device
    #[error("not available")]
    NotAvailable,

    /// A lookup table has no entry for the value
    #[error("value not found: {value}")]
    NotFound { value: String },

    /// A value was rejected by a validity gate or type check
    #[error("invalid: {message}")]
    Invalid { message: String },

    /// Errors that must not be retried
    #[error("{message}")]
    Permanent { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl HestiaError {
    /// Create a new unknown source error
    pub fn unknown_source<S: Into<String>>(name: S) -> Self {
        HestiaError::UnknownSource { name: name.into() }
    }

    /// Create a new unsupported capability error
    pub fn unsupported<S: Into<String>, C: ToString>(plugin: S, capability: C) -> Self {
        HestiaError::Unsupported {
            plugin: plugin.into(),
            capability: capability.to_string(),
        }
    }

    /// Create a new unsupported platform error
    pub fn unsupported_platform<S: Into<String>>(component: S) -> Self {
        HestiaError::UnsupportedPlatform {
            component: component.into(),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HestiaError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        HestiaError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new Modbus error
    pub fn modbus<S: Into<String>>(message: S) -> Self {
        HestiaError::Modbus {
            message: message.into(),
        }
    }

    /// Create a new MQTT error
    pub fn mqtt<S: Into<String>>(message: S) -> Self {
        HestiaError::Mqtt {
            message: message.into(),
        }
    }

    /// Create a new SNMP error
    pub fn snmp<S: Into<String>>(message: S) -> Self {
        HestiaError::Snmp {
            message: message.into(),
        }
    }

    /// Create a new HTTP status error
    pub fn http<S: Into<String>>(status: u16, message: S) -> Self {
        HestiaError::Http {
            status,
            message: message.into(),
        }
    }

    /// Create a new network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        HestiaError::Network {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        HestiaError::Timeout {
            message: message.into(),
        }
    }

    /// Create a new not found error
    pub fn not_found<V: ToString>(value: V) -> Self {
        HestiaError::NotFound {
            value: value.to_string(),
        }
    }

    /// Create a new invalid value error
    pub fn invalid<S: Into<String>>(message: S) -> Self {
        HestiaError::Invalid {
            message: message.into(),
        }
    }

    /// Create a new permanent error
    pub fn permanent<S: Into<String>>(message: S) -> Self {
        HestiaError::Permanent {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HestiaError::Io {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        HestiaError::Generic {
            message: message.into(),
        }
    }

    /// Map a well-known device error token to its sentinel
    pub fn from_known(token: &str) -> Option<Self> {
        match token.trim() {
            "ErrAsleep" => Some(HestiaError::Asleep),
            "ErrMustRetry" => Some(HestiaError::MustRetry),
            "ErrNotAvailable" => Some(HestiaError::NotAvailable),
            _ => None,
        }
    }

    /// Errors raised while resolving a configuration
    pub fn is_setup(&self) -> bool {
        matches!(
            self,
            HestiaError::MissingSource
                | HestiaError::UnknownSource { .. }
                | HestiaError::Unsupported { .. }
                | HestiaError::DuplicatePlugin { .. }
                | HestiaError::UnsupportedPlatform { .. }
                | HestiaError::Config { .. }
                | HestiaError::Validation { .. }
        )
    }

    /// Errors a caller must not retry
    pub fn is_permanent(&self) -> bool {
        matches!(self, HestiaError::Permanent { .. }) || self.is_setup()
    }

    /// Errors worth retrying on the caller's own schedule
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HestiaError::Asleep
                | HestiaError::MustRetry
                | HestiaError::Timeout { .. }
                | HestiaError::Network { .. }
                | HestiaError::Modbus { .. }
                | HestiaError::Mqtt { .. }
                | HestiaError::Snmp { .. }
        )
    }
}

impl From<std::io::Error> for HestiaError {
    fn from(err: std::io::Error) -> Self {
        HestiaError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HestiaError {
    fn from(err: serde_yaml::Error) -> Self {
        HestiaError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HestiaError {
    fn from(err: serde_json::Error) -> Self {
        HestiaError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for HestiaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HestiaError::timeout(err.to_string())
        } else {
            HestiaError::network(err.to_string())
        }
    }
}

impl From<chrono::ParseError> for HestiaError {
    fn from(err: chrono::ParseError) -> Self {
        HestiaError::validation("datetime".to_string(), err.to_string())
    }
}
