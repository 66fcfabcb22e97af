//! Configuration Manager

use super::Config;
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(bind_addr) = std::env::var("APIGUARD_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid APIGUARD_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(log_level) = std::env::var("APIGUARD_LOG_LEVEL") {
            config.monitoring.log_level = log_level;
        }

        if let Ok(threshold) = std::env::var("APIGUARD_SCORE_THRESHOLD") {
            config.security.store.score_threshold = threshold
                .parse::<u32>()
                .with_context(|| format!("Invalid APIGUARD_SCORE_THRESHOLD: {}", threshold))?;
        }

        if let Ok(threshold) = std::env::var("APIGUARD_ATTEMPT_THRESHOLD") {
            config.security.store.attempt_threshold = threshold
                .parse::<u32>()
                .with_context(|| format!("Invalid APIGUARD_ATTEMPT_THRESHOLD: {}", threshold))?;
        }

        if let Ok(minutes) = std::env::var("APIGUARD_AUTO_BAN_MINUTES") {
            config.security.store.auto_ban_minutes = minutes
                .parse::<u64>()
                .with_context(|| format!("Invalid APIGUARD_AUTO_BAN_MINUTES: {}", minutes))?;
        }

        if let Ok(ban_file) = std::env::var("APIGUARD_BAN_FILE") {
            config.security.store.persistence_path = Some(PathBuf::from(ban_file));
        }

        if let Ok(enabled) = std::env::var("APIGUARD_RATE_LIMIT_ENABLED") {
            config.security.rate_limit.enabled = enabled
                .parse::<bool>()
                .with_context(|| format!("Invalid APIGUARD_RATE_LIMIT_ENABLED: {}", enabled))?;
        }

        if let Ok(mgmt_addr) = std::env::var("APIGUARD_MANAGEMENT_BIND_ADDR") {
            config.monitoring.management_api.bind_addr = mgmt_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid APIGUARD_MANAGEMENT_BIND_ADDR: {}", mgmt_addr))?;
        }

        if let Ok(api_key) = std::env::var("APIGUARD_API_KEY") {
            config.monitoring.management_api.auth.api_key = Some(api_key);
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_security_config()
            .with_context(|| "Security configuration validation failed")?;

        self.validate_analytics_config()
            .with_context(|| "Analytics configuration validation failed")?;

        self.validate_monitoring_config()
            .with_context(|| "Monitoring configuration validation failed")?;

        Ok(())
    }

    fn validate_security_config(&self) -> Result<()> {
        let store = &self.security.store;
        if store.score_threshold == 0 {
            bail!("security.store.score_threshold must be greater than 0");
        }

        if store.attempt_threshold == 0 {
            bail!("security.store.attempt_threshold must be greater than 0");
        }

        if store.threat_history_cap == 0 {
            bail!("security.store.threat_history_cap must be greater than 0");
        }

        let rate = &self.security.rate_limit;
        if rate.moderate.max_requests == 0 {
            bail!("security.rate_limit.moderate.max_requests must be greater than 0");
        }

        if rate.strict.max_requests == 0 {
            bail!("security.rate_limit.strict.max_requests must be greater than 0");
        }

        if rate.moderate.window.as_secs() == 0 || rate.strict.window.as_secs() == 0 {
            bail!("rate limit windows must be at least 1 second");
        }

        Ok(())
    }

    fn validate_analytics_config(&self) -> Result<()> {
        if self.analytics.timeline_capacity == 0 {
            bail!("analytics.timeline_capacity must be greater than 0");
        }

        if self.analytics.timeline_capacity > 1_000_000 {
            bail!("analytics.timeline_capacity cannot exceed 1,000,000");
        }

        if self.analytics.latency_sample_cap == 0 {
            bail!("analytics.latency_sample_cap must be greater than 0");
        }

        Ok(())
    }

    fn validate_monitoring_config(&self) -> Result<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.monitoring.log_level.as_str()) {
            bail!(
                "monitoring.log_level must be one of: {}",
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        log_level: Option<&str>,
        ban_file: Option<&Path>,
    ) {
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(level) = log_level {
            self.monitoring.log_level = level.to_string();
            tracing::info!("CLI override: log level set to {}", level);
        }

        if let Some(path) = ban_file {
            self.security.store.persistence_path = Some(path.to_path_buf());
            tracing::info!("CLI override: ban file set to {}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_score_threshold_rejected() {
        let mut config = Config::default();
        config.security.store.score_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut config = Config::default();
        config.monitoring.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let rendered = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.server.bind_addr, config.server.bind_addr);
        assert_eq!(
            parsed.security.store.score_threshold,
            config.security.store.score_threshold
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [server]
            bind_addr = "0.0.0.0:8088"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.server.bind_addr.port(), 8088);
        assert_eq!(parsed.security.store.score_threshold, 300);
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Config::default();
        config.merge_with_cli_args(
            Some("0.0.0.0:4000"),
            Some(5000),
            Some("debug"),
            Some(Path::new("/tmp/bans.json")),
        );

        assert_eq!(config.server.bind_addr.port(), 5000);
        assert_eq!(config.monitoring.log_level, "debug");
        assert!(config.security.store.persistence_path.is_some());
    }
}
