//! Security Pipeline
//!
//! Fixed-order per-request inspection. Every request passes through the same
//! six stages: ban gate, scan analysis, user-agent heuristics, threat
//! detection over query and body fields, tiered rate limiting, then allow.
//! The first terminal stage wins; later stages do not run for a rejected
//! request, so a banned client costs one map lookup and nothing else.
//!
//! The pipeline is handed its collaborators at construction. Nothing here is
//! a singleton; tests wire up small configurations and drive requests
//! straight through `inspect`.

use super::ban_manager::BanManager;
use super::detector::ThreatDetector;
use super::rate_limiter::{RateLimiter, RateTier, ScanVerdict};
use super::ThreatKind;
use crate::analytics::AnalyticsRecorder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Substrings of user agents belonging to known attack and scanning tools.
const ATTACK_TOOL_UA: &[&str] = &[
    r"(?i)sqlmap",
    r"(?i)nikto",
    r"(?i)nessus",
    r"(?i)\bnmap\b",
    r"(?i)masscan",
    r"(?i)burp",
    r"(?i)\bzap\b",
    r"(?i)dirbuster",
    r"(?i)gobuster",
    r"(?i)hydra",
    r"(?i)metasploit",
];

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Path prefixes rated against the strict tier instead of the moderate one.
    pub strict_prefixes: Vec<String>,
    /// Treat a missing User-Agent header as a violation.
    pub require_user_agent: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strict_prefixes: vec!["/admin".to_string(), "/api/v1".to_string()],
            require_user_agent: true,
        }
    }
}

/// Everything the pipeline needs to know about one request. The middleware
/// layer extracts this from the HTTP request; tests build it by hand.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub client_id: String,
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body_fields: Vec<(String, String)>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    pub fn new(client_id: &str, method: &str, path: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            query: Vec::new(),
            body_fields: Vec::new(),
            user_agent: Some("test-client/1.0".to_string()),
        }
    }
}

/// A terminal rejection, ready to be rendered as an HTTP error response.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub status: u16,
    pub error: &'static str,
    pub message: String,
    pub retry_after: Option<Duration>,
    pub banned_for: Option<String>,
}

impl Rejection {
    fn forbidden(message: String, banned_for: Option<String>) -> Self {
        Self {
            status: 403,
            error: "Forbidden",
            message,
            retry_after: None,
            banned_for,
        }
    }

    fn bad_request(message: String) -> Self {
        Self {
            status: 400,
            error: "Bad Request",
            message,
            retry_after: None,
            banned_for: None,
        }
    }

    fn too_many_requests(retry_after: Option<Duration>) -> Self {
        Self {
            status: 429,
            error: "Too Many Requests",
            message: "Rate limit exceeded, slow down".to_string(),
            retry_after,
            banned_for: None,
        }
    }
}

/// Outcome of running the pipeline over one request.
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Let the request proceed. `suspicious` marks requests that tripped a
    /// non-terminal heuristic so analytics can classify them.
    Allow { suspicious: bool },
    Reject(Rejection),
}

pub struct SecurityPipeline {
    config: PipelineConfig,
    detector: ThreatDetector,
    ban_manager: Arc<BanManager>,
    rate_limiter: Arc<RateLimiter>,
    analytics: Arc<AnalyticsRecorder>,
    attack_tool_patterns: Vec<Regex>,
}

impl SecurityPipeline {
    pub fn new(
        config: PipelineConfig,
        detector: ThreatDetector,
        ban_manager: Arc<BanManager>,
        rate_limiter: Arc<RateLimiter>,
        analytics: Arc<AnalyticsRecorder>,
    ) -> Self {
        let attack_tool_patterns = ATTACK_TOOL_UA
            .iter()
            .map(|p| Regex::new(p).expect("invalid built-in user agent pattern"))
            .collect();

        Self {
            config,
            detector,
            ban_manager,
            rate_limiter,
            analytics,
            attack_tool_patterns,
        }
    }

    /// Run the full inspection order over one request. Terminal rejections
    /// are recorded against analytics here; allowed requests are recorded by
    /// the caller once the final status is known.
    pub fn inspect(&self, meta: &RequestMeta) -> Verdict {
        let id = &meta.client_id;

        // Stage 1: ban gate
        if let Some(ban) = self.ban_manager.check_and_reject(id) {
            debug!("Rejecting banned client {} ({})", id, ban.reason);
            let banned_for = match ban.remaining() {
                Some(remaining) => humantime::format_duration(round_secs(remaining)).to_string(),
                None => "permanent".to_string(),
            };
            return self.reject(
                meta,
                Rejection::forbidden(
                    format!("Access denied: {}", ban.reason),
                    Some(banned_for),
                ),
            );
        }

        let mut suspicious = false;

        // Stage 2: endpoint scan analysis
        if let ScanVerdict::Flagged { should_ban } =
            self.rate_limiter.analyze_patterns(id, &meta.path)
        {
            self.analytics.record_threat(
                ThreatKind::PossibleScan.as_str(),
                id,
                format!("endpoint scan across {}", meta.path),
            );
            if should_ban {
                return self.reject(
                    meta,
                    Rejection::forbidden("Access denied: suspicious activity".to_string(), None),
                );
            }
            suspicious = true;
        }

        // Stage 3: user agent heuristics
        match meta.user_agent.as_deref() {
            None | Some("") => {
                if self.config.require_user_agent {
                    let should_ban = self
                        .ban_manager
                        .record_suspicious_activity(id, ThreatKind::InvalidInput);
                    if should_ban {
                        return self.reject(
                            meta,
                            Rejection::forbidden(
                                "Access denied: suspicious activity".to_string(),
                                None,
                            ),
                        );
                    }
                    suspicious = true;
                }
            }
            Some(ua) => {
                if self.attack_tool_patterns.iter().any(|p| p.is_match(ua)) {
                    warn!("Attack tool user agent from {}: {}", id, ua);
                    self.analytics.record_threat(
                        ThreatKind::AttackTool.as_str(),
                        id,
                        format!("attack tool user agent: {}", ua),
                    );
                    let should_ban = self
                        .ban_manager
                        .record_suspicious_activity(id, ThreatKind::AttackTool);
                    if should_ban {
                        return self.reject(
                            meta,
                            Rejection::forbidden(
                                "Access denied: suspicious activity".to_string(),
                                None,
                            ),
                        );
                    }
                    suspicious = true;
                }
            }
        }

        // Stage 4: threat detection over query and body fields
        for (source, fields) in [("query", &meta.query), ("body", &meta.body_fields)] {
            for (name, value) in fields {
                let field = format!("{}.{}", source, name);
                let detection = self.detector.detect(value, &field);
                if !detection.is_malicious {
                    continue;
                }

                for threat in &detection.threats {
                    warn!(
                        "Threat from {}: {} in {} ({})",
                        id, threat.kind, threat.field, threat.matched
                    );
                    self.analytics.record_threat(
                        threat.kind.as_str(),
                        id,
                        format!("{} in {}", threat.kind, threat.field),
                    );
                }

                // Score the primary matched type only; one violation per request
                let primary = &detection.threats[0];
                let should_ban = self
                    .ban_manager
                    .record_suspicious_activity(id, primary.kind);

                let rejection = if should_ban {
                    Rejection::forbidden("Access denied: suspicious activity".to_string(), None)
                } else {
                    Rejection::bad_request(format!(
                        "{} detected in {}",
                        primary.kind, primary.field
                    ))
                };
                return self.reject(meta, rejection);
            }
        }

        // Stage 5: tiered rate limit
        let tier = if self
            .config
            .strict_prefixes
            .iter()
            .any(|prefix| meta.path.starts_with(prefix.as_str()))
        {
            RateTier::Strict
        } else {
            RateTier::Moderate
        };
        let decision = self.rate_limiter.allow(id, tier);
        if !decision.allowed {
            return self.reject(meta, Rejection::too_many_requests(decision.retry_after));
        }

        Verdict::Allow { suspicious }
    }

    fn reject(&self, meta: &RequestMeta, rejection: Rejection) -> Verdict {
        self.analytics.record_request(
            &meta.client_id,
            &meta.path,
            &meta.method,
            rejection.status,
            true,
            false,
            Some(rejection.message.clone()),
        );
        Verdict::Reject(rejection)
    }

    pub fn analytics(&self) -> &Arc<AnalyticsRecorder> {
        &self.analytics
    }
}

fn round_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}
