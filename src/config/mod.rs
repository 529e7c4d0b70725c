//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: config struct definitions and loading
//! - [`defaults`]: serde default functions
//! - [`validation`]: startup checks that report every problem at once

pub mod defaults;
mod types;
mod validation;

pub use types::{
    Config, ConfigError, DiscoveryConfig, LogFormat, LoggingConfig, MetricsConfig, ServiceConfig,
    TransportConfig,
};
pub use validation::{ValidationError, validate};
