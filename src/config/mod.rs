//! Configuration Module
//!
//! TOML file loading with environment and CLI overrides, validated before
//! anything starts.

pub mod manager;
pub mod types;

pub use manager::ConfigManager;
pub use types::{Config, ManagementApiConfig, MonitoringConfig, ServerConfig};
