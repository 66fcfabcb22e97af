//! Security Module
//!
//! The defensive core of the gateway: pattern-based threat detection,
//! adaptive suspicion scoring with automatic IP bans, tiered rate limiting,
//! and the per-request pipeline that ties them together.

pub mod ban_manager;
pub mod detector;
pub mod middleware;
pub mod pipeline;
pub mod rate_limiter;
pub mod store;

pub use ban_manager::BanManager;
pub use detector::{Detection, ThreatDetector, ThreatEvent};
pub use pipeline::{PipelineConfig, RequestMeta, SecurityPipeline, Verdict};
pub use rate_limiter::{RateLimitConfig, RateLimiter, RateTier, TierConfig};
pub use store::{BanRecord, IpRecordStore, RecordStoreConfig, SuspicionRecord, ThreatWeights};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Threat and violation taxonomy shared by the detector, the record store
/// (for scoring weights) and analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
    SqlInjection,
    Xss,
    PathTraversal,
    CommandInjection,
    LdapInjection,
    RateLimit,
    InvalidInput,
    PossibleScan,
    AttackTool,
}

impl ThreatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatKind::SqlInjection => "sql_injection",
            ThreatKind::Xss => "xss",
            ThreatKind::PathTraversal => "path_traversal",
            ThreatKind::CommandInjection => "command_injection",
            ThreatKind::LdapInjection => "ldap_injection",
            ThreatKind::RateLimit => "rate_limit",
            ThreatKind::InvalidInput => "invalid_input",
            ThreatKind::PossibleScan => "possible_scan",
            ThreatKind::AttackTool => "attack_tool",
        }
    }
}

impl fmt::Display for ThreatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Security configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SecurityConfig {
    pub store: RecordStoreConfig,
    pub rate_limit: RateLimitConfig,
    pub pipeline: PipelineConfig,
}
