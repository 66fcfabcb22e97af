//! Analytics Recorder
//!
//! All writes are O(1) amortized against bounded structures: the timeline is
//! a ring buffer, latency keeps a capped sample list with a rolling mean,
//! and everything else is a counter. A retention sweep purges timeline
//! entries past the retention window independently of the size bound.

use super::types::{
    AnalyticsConfig, AnalyticsStats, EndpointStats, TimelineEntry, TimelineKind,
};
use prometheus::{Counter, Histogram, Registry, TextEncoder};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error};

#[derive(Debug, Default)]
struct Inner {
    timeline: VecDeque<TimelineEntry>,
    latency_samples: VecDeque<f64>,
    average_response_ms: f64,
    endpoint_counts: HashMap<String, u64>,
    status_counts: HashMap<u16, u64>,
    threat_counts: HashMap<String, u64>,
}

/// Bounded observability sink fed by the security pipeline.
pub struct AnalyticsRecorder {
    config: AnalyticsConfig,
    inner: Mutex<Inner>,
    total_requests: AtomicU64,
    blocked_requests: AtomicU64,
    suspicious_requests: AtomicU64,
    threats_detected: AtomicU64,
    started_at: Instant,

    prometheus_registry: Registry,
    requests_total: Counter,
    blocked_total: Counter,
    threats_total: Counter,
    response_time: Histogram,
}

impl AnalyticsRecorder {
    pub fn new(config: AnalyticsConfig) -> Self {
        let prometheus_registry = Registry::new();

        let requests_total = Counter::new(
            "apiguard_requests_total",
            "Total requests inspected by the security pipeline",
        )
        .expect("Failed to create requests_total counter");

        let blocked_total = Counter::new(
            "apiguard_blocked_requests_total",
            "Total requests rejected by the security pipeline",
        )
        .expect("Failed to create blocked_total counter");

        let threats_total = Counter::new(
            "apiguard_threats_detected_total",
            "Total threat detections across all categories",
        )
        .expect("Failed to create threats_total counter");

        let response_time = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "apiguard_response_time_ms",
                "Upstream response time in milliseconds",
            )
            .buckets(vec![1.0, 5.0, 10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]),
        )
        .expect("Failed to create response_time histogram");

        prometheus_registry
            .register(Box::new(requests_total.clone()))
            .expect("Failed to register requests_total");
        prometheus_registry
            .register(Box::new(blocked_total.clone()))
            .expect("Failed to register blocked_total");
        prometheus_registry
            .register(Box::new(threats_total.clone()))
            .expect("Failed to register threats_total");
        prometheus_registry
            .register(Box::new(response_time.clone()))
            .expect("Failed to register response_time");

        Self {
            config,
            inner: Mutex::new(Inner::default()),
            total_requests: AtomicU64::new(0),
            blocked_requests: AtomicU64::new(0),
            suspicious_requests: AtomicU64::new(0),
            threats_detected: AtomicU64::new(0),
            started_at: Instant::now(),
            prometheus_registry,
            requests_total,
            blocked_total,
            threats_total,
            response_time,
        }
    }

    /// Record one completed (or rejected) request.
    pub fn record_request(
        &self,
        client_id: &str,
        endpoint: &str,
        method: &str,
        status: u16,
        blocked: bool,
        suspicious: bool,
        detail: Option<String>,
    ) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.requests_total.inc();
        if blocked {
            self.blocked_requests.fetch_add(1, Ordering::Relaxed);
            self.blocked_total.inc();
        }
        if suspicious {
            self.suspicious_requests.fetch_add(1, Ordering::Relaxed);
        }

        let kind = if blocked {
            TimelineKind::Blocked
        } else if suspicious {
            TimelineKind::Suspicious
        } else {
            TimelineKind::Normal
        };

        let mut inner = self.inner.lock().unwrap();
        *inner.endpoint_counts.entry(endpoint.to_string()).or_insert(0) += 1;
        *inner.status_counts.entry(status).or_insert(0) += 1;
        Self::push_timeline(
            &mut inner,
            self.config.timeline_capacity,
            TimelineEntry {
                kind,
                client_id: client_id.to_string(),
                endpoint: endpoint.to_string(),
                method: method.to_string(),
                timestamp: SystemTime::now(),
                detail,
            },
        );
    }

    /// Record one threat detection.
    pub fn record_threat(&self, threat_type: &str, client_id: &str, detail: String) {
        self.threats_detected.fetch_add(1, Ordering::Relaxed);
        self.threats_total.inc();

        let mut inner = self.inner.lock().unwrap();
        *inner.threat_counts.entry(threat_type.to_string()).or_insert(0) += 1;
        Self::push_timeline(
            &mut inner,
            self.config.timeline_capacity,
            TimelineEntry {
                kind: TimelineKind::Threat,
                client_id: client_id.to_string(),
                endpoint: String::new(),
                method: String::new(),
                timestamp: SystemTime::now(),
                detail: Some(detail),
            },
        );
    }

    /// Record a latency sample: evict the oldest past the cap, then
    /// recompute the mean over what remains.
    pub fn record_response_time(&self, ms: f64) {
        self.response_time.observe(ms);

        let mut inner = self.inner.lock().unwrap();
        inner.latency_samples.push_back(ms);
        if inner.latency_samples.len() > self.config.latency_sample_cap {
            inner.latency_samples.pop_front();
        }
        let sum: f64 = inner.latency_samples.iter().sum();
        inner.average_response_ms = sum / inner.latency_samples.len() as f64;
    }

    fn push_timeline(inner: &mut Inner, capacity: usize, entry: TimelineEntry) {
        inner.timeline.push_back(entry);
        if inner.timeline.len() > capacity {
            inner.timeline.pop_front();
        }
    }

    /// Aggregate snapshot. Ban/suspicion counts live in the record store and
    /// are composed by the management layer.
    pub fn get_stats(&self) -> AnalyticsStats {
        let inner = self.inner.lock().unwrap();
        let total = self.total_requests.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64().max(1e-3);

        let mut top_endpoints: Vec<EndpointStats> = inner
            .endpoint_counts
            .iter()
            .map(|(endpoint, requests)| EndpointStats {
                endpoint: endpoint.clone(),
                requests: *requests,
            })
            .collect();
        top_endpoints.sort_by(|a, b| b.requests.cmp(&a.requests));
        top_endpoints.truncate(self.config.top_endpoints);

        AnalyticsStats {
            total_requests: total,
            blocked_requests: self.blocked_requests.load(Ordering::Relaxed),
            suspicious_requests: self.suspicious_requests.load(Ordering::Relaxed),
            threats_detected: self.threats_detected.load(Ordering::Relaxed),
            requests_per_second: total as f64 / elapsed,
            average_response_ms: inner.average_response_ms,
            status_counts: inner.status_counts.clone(),
            top_endpoints,
            threat_counts: inner.threat_counts.clone(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    /// Most recent `limit` timeline entries, most-recent-first.
    pub fn get_recent_events(&self, limit: usize) -> Vec<TimelineEntry> {
        let inner = self.inner.lock().unwrap();
        inner.timeline.iter().rev().take(limit).cloned().collect()
    }

    /// Purge timeline entries older than the retention window. Runs on its
    /// own timer, independent of the size-bound eviction.
    pub fn prune_timeline(&self) -> usize {
        let cutoff = SystemTime::now() - self.config.retention;
        let mut inner = self.inner.lock().unwrap();

        let before = inner.timeline.len();
        while let Some(entry) = inner.timeline.front() {
            if entry.timestamp < cutoff {
                inner.timeline.pop_front();
            } else {
                break;
            }
        }
        let purged = before - inner.timeline.len();

        if purged > 0 {
            debug!("Purged {} timeline entr(ies) past retention", purged);
        }
        purged
    }

    /// Export the Prometheus registry in text format.
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus_registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        self.config.sweep_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder_with_capacity(capacity: usize) -> AnalyticsRecorder {
        AnalyticsRecorder::new(AnalyticsConfig {
            timeline_capacity: capacity,
            ..Default::default()
        })
    }

    #[test]
    fn test_timeline_ring_buffer_eviction() {
        let recorder = recorder_with_capacity(5);

        for i in 0..12 {
            recorder.record_request(
                "10.2.0.1",
                &format!("/api/data/{}", i),
                "GET",
                200,
                false,
                false,
                None,
            );
        }

        let events = recorder.get_recent_events(5);
        assert_eq!(events.len(), 5);

        // Most-recent-first: 11, 10, 9, 8, 7
        for (offset, event) in events.iter().enumerate() {
            assert_eq!(event.endpoint, format!("/api/data/{}", 11 - offset));
        }
    }

    #[test]
    fn test_recent_events_limit() {
        let recorder = recorder_with_capacity(100);

        for _ in 0..20 {
            recorder.record_request("10.2.0.2", "/api/data", "GET", 200, false, false, None);
        }

        assert_eq!(recorder.get_recent_events(7).len(), 7);
        assert_eq!(recorder.get_recent_events(500).len(), 20);
    }

    #[test]
    fn test_counters_and_kinds() {
        let recorder = recorder_with_capacity(50);

        recorder.record_request("a", "/x", "GET", 200, false, false, None);
        recorder.record_request("b", "/x", "GET", 403, true, false, None);
        recorder.record_request("c", "/x", "GET", 200, false, true, None);

        let stats = recorder.get_stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.blocked_requests, 1);
        assert_eq!(stats.suspicious_requests, 1);
        assert_eq!(stats.status_counts.get(&403), Some(&1));

        let events = recorder.get_recent_events(3);
        assert_eq!(events[0].kind, TimelineKind::Suspicious);
        assert_eq!(events[1].kind, TimelineKind::Blocked);
        assert_eq!(events[2].kind, TimelineKind::Normal);
    }

    #[test]
    fn test_threat_recording() {
        let recorder = recorder_with_capacity(50);

        recorder.record_threat("sql_injection", "10.2.0.3", "sql_injection in query.lat".into());
        recorder.record_threat("sql_injection", "10.2.0.3", "sql_injection in query.lon".into());
        recorder.record_threat("xss", "10.2.0.4", "xss in body.name".into());

        let stats = recorder.get_stats();
        assert_eq!(stats.threats_detected, 3);
        assert_eq!(stats.threat_counts.get("sql_injection"), Some(&2));
        assert_eq!(stats.threat_counts.get("xss"), Some(&1));
    }

    #[test]
    fn test_latency_rolling_average() {
        let recorder = AnalyticsRecorder::new(AnalyticsConfig {
            latency_sample_cap: 3,
            ..Default::default()
        });

        recorder.record_response_time(10.0);
        recorder.record_response_time(20.0);
        recorder.record_response_time(30.0);
        assert!((recorder.get_stats().average_response_ms - 20.0).abs() < f64::EPSILON);

        // 10.0 evicted: mean over 20, 30, 100
        recorder.record_response_time(100.0);
        assert!((recorder.get_stats().average_response_ms - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_requests_per_second_is_positive() {
        let recorder = recorder_with_capacity(10);
        recorder.record_request("a", "/x", "GET", 200, false, false, None);

        assert!(recorder.get_stats().requests_per_second > 0.0);
    }

    #[test]
    fn test_top_endpoints_ordering() {
        let recorder = recorder_with_capacity(100);

        for _ in 0..5 {
            recorder.record_request("a", "/api/data", "GET", 200, false, false, None);
        }
        for _ in 0..2 {
            recorder.record_request("a", "/api/status", "GET", 200, false, false, None);
        }

        let stats = recorder.get_stats();
        assert_eq!(stats.top_endpoints[0].endpoint, "/api/data");
        assert_eq!(stats.top_endpoints[0].requests, 5);
    }

    #[test]
    fn test_retention_prune() {
        let recorder = AnalyticsRecorder::new(AnalyticsConfig {
            retention: Duration::from_millis(10),
            ..Default::default()
        });

        recorder.record_request("a", "/x", "GET", 200, false, false, None);
        std::thread::sleep(Duration::from_millis(30));
        recorder.record_request("a", "/y", "GET", 200, false, false, None);

        let purged = recorder.prune_timeline();
        assert_eq!(purged, 1);

        let events = recorder.get_recent_events(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].endpoint, "/y");
    }

    #[test]
    fn test_prometheus_export_contains_counters() {
        let recorder = recorder_with_capacity(10);
        recorder.record_request("a", "/x", "GET", 200, false, false, None);

        let text = recorder.export_prometheus();
        assert!(text.contains("apiguard_requests_total"));
    }
}
