//! Configuration management for Hestia
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. Device entries embed plugin configurations
//! which are resolved lazily through the plugin registry.

mod defaults;

use crate::error::{HestiaError, Result};
use crate::plugin;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Default MQTT broker for plugins without their own `broker`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt: Option<MqttSettings>,

    /// Devices resolved by the diagnostics binary
    pub devices: BTreeMap<String, DeviceConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console specific level
    pub console_level: Option<String>,

    /// Optional file specific level
    pub file_level: Option<String>,

    /// Path to log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// MQTT broker connection settings
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MqttSettings {
    /// Broker address, `host[:port]`, optionally prefixed with `tcp://` or `tls://`
    pub broker: String,

    pub user: String,

    pub password: String,

    /// Client id, generated when empty
    #[serde(alias = "clientid", alias = "clientID")]
    pub client_id: String,

    /// PEM encoded CA certificate for `tls://` brokers
    pub ca_cert: String,

    /// PEM encoded client certificate
    pub client_cert: String,

    /// PEM encoded client key
    pub client_key: String,
}

/// Value kind a device is read as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[default]
    Float,
    Int,
    String,
    Bool,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Float => "float",
            ValueKind::Int => "int",
            ValueKind::String => "string",
            ValueKind::Bool => "bool",
        };
        f.write_str(s)
    }
}

/// A configured device: a plugin configuration and how to read it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub kind: ValueKind,

    #[serde(flatten)]
    pub plugin: plugin::Config,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = ["hestia.yaml", "/etc/hestia/config.yaml"];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        crate::logging::parse_log_level(&self.logging.level)
            .map_err(|_| HestiaError::validation("logging.level", "Invalid log level"))?;

        if let Some(mqtt) = &self.mqtt
            && mqtt.broker.is_empty()
        {
            return Err(HestiaError::validation(
                "mqtt.broker",
                "Broker cannot be empty",
            ));
        }

        for (name, device) in &self.devices {
            if device.plugin.source.is_empty() {
                return Err(HestiaError::validation(
                    format!("devices.{}.source", name),
                    "Missing plugin source".to_string(),
                ));
            }
        }

        Ok(())
    }
}
