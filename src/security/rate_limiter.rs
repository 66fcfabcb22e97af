//! Tiered Rate Limiting
//!
//! Fixed-window request counters per client, with two independently
//! configured tiers: a moderate tier for primary data endpoints and a strict
//! tier for administrative/security endpoints. Exceeding the moderate tier
//! records a scored violation; exceeding the strict tier bans outright,
//! since hammering sensitive endpoints is treated as higher severity per se.
//!
//! A secondary pattern analysis watches the set of distinct endpoints each
//! client touches inside a rolling one-minute window and escalates probable
//! endpoint scans. That state is independent of the ban tables and is swept
//! on its own timer to bound memory.

use super::ban_manager::BanManager;
use super::ThreatKind;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A named rate-limiting tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateTier {
    Moderate,
    Strict,
}

impl RateTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateTier::Moderate => "moderate",
            RateTier::Strict => "strict",
        }
    }
}

/// Window/limit pair for one tier.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TierConfig {
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub max_requests: u32,
}

/// Rate limiter configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub moderate: TierConfig,
    pub strict: TierConfig,
    /// Ban length applied on strict-tier violations.
    pub strict_ban_minutes: u64,
    #[serde(with = "humantime_serde")]
    pub scan_window: Duration,
    pub scan_endpoint_threshold: usize,
    pub scan_request_threshold: usize,
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            moderate: TierConfig {
                window: Duration::from_secs(15 * 60),
                max_requests: 100,
            },
            strict: TierConfig {
                window: Duration::from_secs(60 * 60),
                max_requests: 20,
            },
            strict_ban_minutes: 60,
            scan_window: Duration::from_secs(60),
            scan_endpoint_threshold: 15,
            scan_request_threshold: 30,
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

/// Outcome of a rate check.
#[derive(Debug, Clone)]
pub struct RateDecision {
    pub allowed: bool,
    pub retry_after: Option<Duration>,
}

impl RateDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: None,
        }
    }
}

/// Outcome of the endpoint-scan analysis.
#[derive(Debug, Clone, Copy)]
pub enum ScanVerdict {
    Clean,
    Flagged { should_ban: bool },
}

#[derive(Debug)]
struct RateWindow {
    window_start: Instant,
    count: u32,
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            window_start: now,
            count: 0,
        }
    }

    /// Count one request against the window, resetting it first if elapsed.
    fn tick(&mut self, window: Duration, now: Instant) -> u32 {
        if now.duration_since(self.window_start) >= window {
            self.window_start = now;
            self.count = 0;
        }
        self.count += 1;
        self.count
    }

    fn remaining(&self, window: Duration, now: Instant) -> Duration {
        window.saturating_sub(now.duration_since(self.window_start))
    }
}

#[derive(Debug)]
struct ClientWindows {
    moderate: RateWindow,
    strict: RateWindow,
    last_activity: Instant,
}

impl ClientWindows {
    fn new(now: Instant) -> Self {
        Self {
            moderate: RateWindow::new(now),
            strict: RateWindow::new(now),
            last_activity: now,
        }
    }
}

#[derive(Debug, Default)]
struct InternalRateStats {
    total_checked: u64,
    total_limited: u64,
    scans_flagged: u64,
}

/// Per-tier rate limiter statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub total_checked: u64,
    pub total_limited: u64,
    pub scans_flagged: u64,
    pub tracked_clients: usize,
}

/// Tiered rate limiter with scan-pattern escalation.
pub struct RateLimiter {
    config: RateLimitConfig,
    ban_manager: Arc<BanManager>,
    windows: Mutex<HashMap<String, ClientWindows>>,
    recent_requests: Mutex<HashMap<String, VecDeque<(Instant, String)>>>,
    stats: Mutex<InternalRateStats>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, ban_manager: Arc<BanManager>) -> Self {
        Self {
            config,
            ban_manager,
            windows: Mutex::new(HashMap::new()),
            recent_requests: Mutex::new(HashMap::new()),
            stats: Mutex::new(InternalRateStats::default()),
        }
    }

    /// Count a request against the client's window for the given tier.
    pub fn allow(&self, id: &str, tier: RateTier) -> RateDecision {
        if !self.config.enabled {
            return RateDecision::allow();
        }

        {
            let mut stats = self.stats.lock().unwrap();
            stats.total_checked += 1;
        }

        let now = Instant::now();
        let retry_after = {
            let mut windows = self.windows.lock().unwrap();
            let client = windows
                .entry(id.to_string())
                .or_insert_with(|| ClientWindows::new(now));
            client.last_activity = now;

            let (window, tier_config) = match tier {
                RateTier::Moderate => (&mut client.moderate, &self.config.moderate),
                RateTier::Strict => (&mut client.strict, &self.config.strict),
            };

            let count = window.tick(tier_config.window, now);
            if count <= tier_config.max_requests {
                debug!(
                    "Request from {} allowed on {} tier ({}/{})",
                    id,
                    tier.as_str(),
                    count,
                    tier_config.max_requests
                );
                return RateDecision::allow();
            }

            window.remaining(tier_config.window, now)
        };

        // Escalate outside the windows lock; ban state has its own locking
        warn!("Rate limit exceeded for {} on {} tier", id, tier.as_str());
        match tier {
            RateTier::Moderate => {
                self.ban_manager
                    .record_suspicious_activity(id, ThreatKind::RateLimit);
            }
            RateTier::Strict => {
                self.ban_manager
                    .ban(id, "rate limit violation", self.config.strict_ban_minutes);
            }
        }

        {
            let mut stats = self.stats.lock().unwrap();
            stats.total_limited += 1;
        }

        RateDecision {
            allowed: false,
            retry_after: Some(retry_after),
        }
    }

    /// Track the endpoint touched by this request and flag probable scans:
    /// many distinct endpoints AND high volume inside the rolling window.
    pub fn analyze_patterns(&self, id: &str, endpoint: &str) -> ScanVerdict {
        if !self.config.enabled {
            return ScanVerdict::Clean;
        }

        let now = Instant::now();
        let flagged = {
            let mut recent = self.recent_requests.lock().unwrap();
            let requests = recent.entry(id.to_string()).or_default();

            requests.push_back((now, endpoint.to_string()));
            // A window longer than the process uptime has no cutoff yet
            if let Some(cutoff) = now.checked_sub(self.config.scan_window) {
                while let Some((when, _)) = requests.front() {
                    if *when < cutoff {
                        requests.pop_front();
                    } else {
                        break;
                    }
                }
            }

            let unique: HashSet<&str> = requests.iter().map(|(_, e)| e.as_str()).collect();
            unique.len() > self.config.scan_endpoint_threshold
                && requests.len() > self.config.scan_request_threshold
        };

        if !flagged {
            return ScanVerdict::Clean;
        }

        warn!("Possible endpoint scan from {}", id);
        {
            let mut stats = self.stats.lock().unwrap();
            stats.scans_flagged += 1;
        }

        let should_ban = self
            .ban_manager
            .record_suspicious_activity(id, ThreatKind::PossibleScan);
        ScanVerdict::Flagged { should_ban }
    }

    /// Drop window state for clients idle past twice the cleanup interval
    /// and rolling request lists that emptied out.
    pub fn cleanup_old_entries(&self) {
        // Cutoffs clamp to process start when the interval exceeds uptime
        let idle_cutoff = self
            .config
            .cleanup_interval
            .checked_mul(2)
            .and_then(|idle| Instant::now().checked_sub(idle));

        let mut windows = self.windows.lock().unwrap();
        let before = windows.len();
        if let Some(cutoff) = idle_cutoff {
            windows.retain(|_, client| client.last_activity > cutoff);
        }
        let removed = before - windows.len();
        drop(windows);

        let scan_cutoff = Instant::now().checked_sub(self.config.scan_window);
        let mut recent = self.recent_requests.lock().unwrap();
        if let Some(cutoff) = scan_cutoff {
            for requests in recent.values_mut() {
                while let Some((when, _)) = requests.front() {
                    if *when < cutoff {
                        requests.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
        recent.retain(|_, requests| !requests.is_empty());

        if removed > 0 {
            debug!("Cleaned up {} idle rate limit entr(ies)", removed);
        }
    }

    pub fn stats(&self) -> RateLimiterStats {
        let stats = self.stats.lock().unwrap();
        let windows = self.windows.lock().unwrap();
        RateLimiterStats {
            total_checked: stats.total_checked,
            total_limited: stats.total_limited,
            scans_flagged: stats.scans_flagged,
            tracked_clients: windows.len(),
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.config.cleanup_interval
    }
}
