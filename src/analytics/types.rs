//! Analytics Types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};

/// Classification of a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    Normal,
    Suspicious,
    Blocked,
    Threat,
}

/// One event in the bounded request timeline.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub kind: TimelineKind,
    pub client_id: String,
    pub endpoint: String,
    pub method: String,
    pub timestamp: SystemTime,
    pub detail: Option<String>,
}

/// Analytics configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyticsConfig {
    pub timeline_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    pub latency_sample_cap: usize,
    pub top_endpoints: usize,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            timeline_capacity: 500,
            retention: Duration::from_secs(24 * 3600),
            latency_sample_cap: 100,
            top_endpoints: 10,
            sweep_interval: Duration::from_secs(600),
        }
    }
}

/// Request count for one endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStats {
    pub endpoint: String,
    pub requests: u64,
}

/// Aggregate snapshot returned by `get_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsStats {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub suspicious_requests: u64,
    pub threats_detected: u64,
    pub requests_per_second: f64,
    pub average_response_ms: f64,
    pub status_counts: HashMap<u16, u64>,
    pub top_endpoints: Vec<EndpointStats>,
    pub threat_counts: HashMap<String, u64>,
    pub uptime_seconds: u64,
}
