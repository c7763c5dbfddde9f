//! # Hestia - configurable value access for home energy devices
//!
//! Hestia reads and writes typed scalar values from meters, chargers and
//! other devices through an open set of backends, and combines them through
//! declarative configuration.
//!
//! ## Architecture
//!
//! - `plugin`: capability traits, registry, config dispatch, backends and
//!   compositions
//! - `config`: application configuration
//! - `logging`: structured logging and tracing
//! - `util`: TTL cache, single slot monitor, durations, templates
//! - `modbus`, `mqtt`, `snmp`, `sma`, `request`: transports used by the
//!   backend plugins

pub mod config;
pub mod error;
pub mod logging;
pub mod modbus;
pub mod mqtt;
pub mod plugin;
pub mod request;
pub mod sma;
pub mod snmp;
pub mod util;

// Re-export commonly used types
pub use config::Config;
pub use error::{HestiaError, Result};
pub use plugin::{Context, Registry};
