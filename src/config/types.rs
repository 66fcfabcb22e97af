//! Configuration Types

use crate::analytics::AnalyticsConfig;
use crate::management::ApiAuthConfig;
use crate::security::SecurityConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Top-level gateway configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub analytics: AnalyticsConfig,
    pub monitoring: MonitoringConfig,
}

/// Data API server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".parse().expect("valid default bind address"),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Monitoring and management configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub management_api: ManagementApiConfig,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            management_api: ManagementApiConfig::default(),
        }
    }
}

/// Management API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagementApiConfig {
    pub enabled: bool,
    pub bind_addr: SocketAddr,
    pub auth: ApiAuthConfig,
}

impl Default for ManagementApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "127.0.0.1:9090"
                .parse()
                .expect("valid default management bind address"),
            auth: ApiAuthConfig::default(),
        }
    }
}
