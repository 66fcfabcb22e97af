//! ApiGuard Library
//!
//! Adaptive threat-scoring gateway for JSON data APIs: pattern-based threat
//! detection, suspicion scoring with automatic IP bans, tiered rate
//! limiting, bounded analytics, and an administrative REST surface.

pub mod analytics;
pub mod config;
pub mod management;
pub mod security;
pub mod shutdown;
pub mod sweeper;

pub use config::Config;
pub use security::SecurityPipeline;
pub use shutdown::ShutdownCoordinator;

/// Common error type for the gateway
pub type Result<T> = anyhow::Result<T>;
