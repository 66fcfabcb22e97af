//! Management API Types

use crate::security::store::{BanRecord, SuspicionRecord};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: SystemTime,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: SystemTime::now(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: SystemTime::now(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub timestamp: SystemTime,
}

/// Security overview combined with the analytics snapshot
#[derive(Debug, Serialize)]
pub struct SecurityStats {
    pub banned_ips: usize,
    pub suspicious_ips: usize,
    #[serde(flatten)]
    pub analytics: crate::analytics::AnalyticsStats,
}

/// One entry in the banned-IP listing
#[derive(Debug, Serialize)]
pub struct BannedIpInfo {
    pub client_id: String,
    pub reason: String,
    pub banned_at: SystemTime,
    pub expires_at: Option<SystemTime>,
    pub violation_count: u32,
}

impl BannedIpInfo {
    pub fn from_record(client_id: String, record: BanRecord) -> Self {
        Self {
            client_id,
            reason: record.reason,
            banned_at: record.banned_at,
            expires_at: record.expires_at,
            violation_count: record.violation_count,
        }
    }
}

/// One entry in the suspicious-IP listing
#[derive(Debug, Serialize)]
pub struct SuspiciousIpInfo {
    pub client_id: String,
    pub attempts: u32,
    pub score: u32,
    pub first_seen: SystemTime,
    pub last_seen: SystemTime,
}

impl SuspiciousIpInfo {
    pub fn from_record(client_id: String, record: SuspicionRecord) -> Self {
        Self {
            client_id,
            attempts: record.attempts,
            score: record.score,
            first_seen: record.first_seen,
            last_seen: record.last_seen,
        }
    }
}

/// Full standing of one client across both tables
#[derive(Debug, Serialize)]
pub struct ClientStanding {
    pub client_id: String,
    pub banned: bool,
    pub ban: Option<BanRecord>,
    pub suspicion: Option<SuspicionRecord>,
}

/// Manual ban request
#[derive(Debug, Deserialize)]
pub struct BanRequest {
    pub client_id: String,
    pub reason: Option<String>,
    /// Minutes; 0 or absent means permanent. Values outside 0..=1 year
    /// are rejected.
    pub duration_minutes: Option<i64>,
}

/// API authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiAuthConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub basic_auth: Option<BasicAuthConfig>,
}

/// Basic authentication configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: String,
}

impl Default for ApiAuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: Some("default-api-key-change-me".to_string()),
            basic_auth: None,
        }
    }
}
