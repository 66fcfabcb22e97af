//! IP Record Store
//!
//! Owns the two shared tables of the security subsystem: suspicion records
//! (accumulating evidence below the ban threshold) and ban records. A single
//! mutex guards both so that check-then-mutate sequences stay atomic per
//! client: a suspicion record is never left behind once a ban is issued, and
//! two concurrent violations cannot both observe the pre-increment score.
//!
//! The ban table is persisted to a JSON file as best-effort asynchronous
//! durability: the in-memory state is authoritative for the process lifetime,
//! writes happen on a background thread, and a failed write is logged but
//! never fails the request path. Expired bans are removed lazily on read and
//! garbage-collected by the periodic sweep.

use super::ThreatKind;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Scoring weights per violation kind. Kinds without an explicit entry use
/// the fallback weight.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThreatWeights {
    pub sql_injection: u32,
    pub path_traversal: u32,
    pub xss: u32,
    pub rate_limit: u32,
    pub invalid_input: u32,
    pub fallback: u32,
}

impl Default for ThreatWeights {
    fn default() -> Self {
        Self {
            sql_injection: 50,
            path_traversal: 45,
            xss: 40,
            rate_limit: 10,
            invalid_input: 5,
            fallback: 15,
        }
    }
}

impl ThreatWeights {
    pub fn weight_for(&self, kind: ThreatKind) -> u32 {
        match kind {
            ThreatKind::SqlInjection => self.sql_injection,
            ThreatKind::PathTraversal => self.path_traversal,
            ThreatKind::Xss => self.xss,
            ThreatKind::RateLimit => self.rate_limit,
            ThreatKind::InvalidInput => self.invalid_input,
            _ => self.fallback,
        }
    }
}

/// Record store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordStoreConfig {
    pub score_threshold: u32,
    pub attempt_threshold: u32,
    pub auto_ban_minutes: u64,
    #[serde(with = "humantime_serde")]
    pub idle_eviction: Duration,
    pub threat_history_cap: usize,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    pub persistence_path: Option<PathBuf>,
    pub weights: ThreatWeights,
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            // Deliberately generous to avoid locking out legitimate traffic
            score_threshold: 300,
            attempt_threshold: 20,
            auto_ban_minutes: 30,
            idle_eviction: Duration::from_secs(3600),
            threat_history_cap: 20,
            sweep_interval: Duration::from_secs(60),
            persistence_path: None,
            weights: ThreatWeights::default(),
        }
    }
}

/// One entry in a suspicion record's bounded history.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThreatMark {
    pub kind: ThreatKind,
    pub timestamp: SystemTime,
}

/// Accumulating evidence of bad behavior below the ban threshold.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuspicionRecord {
    pub attempts: u32,
    pub score: u32,
    pub first_seen: SystemTime,
    pub last_seen: SystemTime,
    pub threat_history: VecDeque<ThreatMark>,
}

impl SuspicionRecord {
    fn new(now: SystemTime) -> Self {
        Self {
            attempts: 0,
            score: 0,
            first_seen: now,
            last_seen: now,
            threat_history: VecDeque::new(),
        }
    }
}

/// A time-bounded or permanent denial of service to one client identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BanRecord {
    pub reason: String,
    pub banned_at: SystemTime,
    /// None means permanent.
    pub expires_at: Option<SystemTime>,
    pub violation_count: u32,
}

impl BanRecord {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => SystemTime::now() >= expires_at,
            None => false,
        }
    }

    /// Time until the ban lifts, None for permanent bans.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .and_then(|expires_at| expires_at.duration_since(SystemTime::now()).ok())
    }
}

#[derive(Debug, Default)]
struct Tables {
    suspicion: HashMap<String, SuspicionRecord>,
    bans: HashMap<String, BanRecord>,
}

/// Shared state table for per-client suspicion and ban records.
pub struct IpRecordStore {
    config: RecordStoreConfig,
    tables: Mutex<Tables>,
    /// Snapshot sequence, assigned under the tables lock.
    persist_seq: AtomicU64,
    /// Highest sequence that reached disk. Shared with writer threads.
    last_persisted: Arc<Mutex<u64>>,
}

impl IpRecordStore {
    /// Create a store, loading any persisted ban table. A missing file is a
    /// normal first run; malformed content is logged and treated as empty.
    pub fn new(config: RecordStoreConfig) -> Self {
        let bans = match &config.persistence_path {
            Some(path) => Self::load_persisted(path),
            None => HashMap::new(),
        };

        if !bans.is_empty() {
            info!("Loaded {} persisted ban(s)", bans.len());
        }

        Self {
            config,
            tables: Mutex::new(Tables {
                suspicion: HashMap::new(),
                bans,
            }),
            persist_seq: AtomicU64::new(0),
            last_persisted: Arc::new(Mutex::new(0)),
        }
    }

    fn load_persisted(path: &PathBuf) -> HashMap<String, BanRecord> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No persisted ban table at {}, starting empty", path.display());
                return HashMap::new();
            }
            Err(e) => {
                warn!("Failed to read ban table {}: {}", path.display(), e);
                return HashMap::new();
            }
        };

        let loaded: HashMap<String, BanRecord> = match serde_json::from_str(&content) {
            Ok(loaded) => loaded,
            Err(e) => {
                // Fail-open: a corrupt file must not prevent startup
                warn!("Corrupt ban table {}, treating as empty: {}", path.display(), e);
                return HashMap::new();
            }
        };

        let total = loaded.len();
        let bans: HashMap<String, BanRecord> = loaded
            .into_iter()
            .filter(|(_, record)| !record.is_expired())
            .collect();

        let discarded = total - bans.len();
        if discarded > 0 {
            debug!("Discarded {} expired ban(s) at load", discarded);
        }

        bans
    }

    /// Snapshot the ban table and hand the write to a background thread.
    /// Called while holding the tables lock; only serialization happens
    /// inline, the disk write is off the critical path. Each snapshot gets
    /// a sequence number under the lock, and writer threads only write if
    /// no newer snapshot has already reached disk, so concurrent writers
    /// cannot roll the file back to a stale state.
    fn persist(&self, tables: &Tables) {
        let Some(path) = self.config.persistence_path.clone() else {
            return;
        };

        let snapshot = match serde_json::to_string_pretty(&tables.bans) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!("Failed to serialize ban table: {}", e);
                return;
            }
        };

        let seq = self.persist_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let last_persisted = Arc::clone(&self.last_persisted);

        std::thread::spawn(move || {
            let mut last = last_persisted.lock().unwrap();
            if seq <= *last {
                // A newer snapshot already landed
                return;
            }
            match std::fs::write(&path, snapshot) {
                Ok(()) => *last = seq,
                Err(e) => error!("Failed to persist ban table to {}: {}", path.display(), e),
            }
        });
    }

    /// True only if a non-expired ban exists. An expired ban found here is
    /// removed before returning false (lazy expiry).
    pub fn is_banned(&self, id: &str) -> bool {
        let mut tables = self.tables.lock().unwrap();

        let expired = match tables.bans.get(id) {
            Some(record) if record.is_expired() => true,
            Some(_) => return true,
            None => return false,
        };

        if expired {
            tables.bans.remove(id);
            debug!("Ban for {} expired, removed on read", id);
            self.persist(&tables);
        }
        false
    }

    pub fn get_ban_info(&self, id: &str) -> Option<BanRecord> {
        let tables = self.tables.lock().unwrap();
        tables.bans.get(id).filter(|r| !r.is_expired()).cloned()
    }

    /// Ban a client. `duration_minutes == 0` means permanent. Any suspicion
    /// record for the same id is removed in the same locked section.
    pub fn ban(&self, id: &str, reason: &str, duration_minutes: u64) -> BanRecord {
        let duration = if duration_minutes == 0 {
            None
        } else {
            Some(Duration::from_secs(duration_minutes.saturating_mul(60)))
        };
        self.ban_for(id, reason, duration)
    }

    /// Duration-granular ban used internally and by tests; `None` = permanent.
    pub fn ban_for(&self, id: &str, reason: &str, duration: Option<Duration>) -> BanRecord {
        let now = SystemTime::now();
        let mut tables = self.tables.lock().unwrap();

        // Promotion is atomic: suspicion evidence is folded into the ban
        let violation_count = tables
            .suspicion
            .remove(id)
            .map(|s| s.attempts)
            .unwrap_or(1);

        let record = BanRecord {
            reason: reason.to_string(),
            banned_at: now,
            // An expiry beyond representable time collapses to permanent
            expires_at: duration.and_then(|d| now.checked_add(d)),
            violation_count,
        };

        tables.bans.insert(id.to_string(), record.clone());
        self.persist(&tables);

        info!(
            "Banned {} ({}), expires: {}",
            id,
            reason,
            match record.remaining() {
                Some(left) => humantime::format_duration(Duration::from_secs(left.as_secs())).to_string(),
                None => "never".to_string(),
            }
        );

        record
    }

    /// Remove a ban. Returns false (not an error) when the id was not banned.
    pub fn unban(&self, id: &str) -> bool {
        let mut tables = self.tables.lock().unwrap();
        if tables.bans.remove(id).is_some() {
            self.persist(&tables);
            info!("Unbanned {}", id);
            true
        } else {
            false
        }
    }

    /// Record one violation: increments attempts, appends to the bounded
    /// history, adds the kind-specific weight, and issues the ban in the same
    /// locked section when either threshold is crossed. Returns true iff the
    /// client is (now) banned.
    pub fn record_suspicious_activity(&self, id: &str, kind: ThreatKind) -> bool {
        let now = SystemTime::now();
        let mut tables = self.tables.lock().unwrap();

        if tables.bans.get(id).is_some_and(|r| !r.is_expired()) {
            return true;
        }

        let record = tables
            .suspicion
            .entry(id.to_string())
            .or_insert_with(|| SuspicionRecord::new(now));

        record.attempts += 1;
        record.last_seen = now;
        record.threat_history.push_back(ThreatMark { kind, timestamp: now });
        if record.threat_history.len() > self.config.threat_history_cap {
            record.threat_history.pop_front();
        }
        record.score += self.config.weights.weight_for(kind);

        let attempts = record.attempts;
        let score = record.score;

        if score < self.config.score_threshold && attempts < self.config.attempt_threshold {
            debug!(
                "Suspicious activity from {}: {} (attempts: {}, score: {})",
                id, kind, attempts, score
            );
            return false;
        }

        // Threshold crossed: promote within the same lock
        let reason = format!("automatic: {} attempts, score {}", attempts, score);
        tables.suspicion.remove(id);

        let duration = if self.config.auto_ban_minutes == 0 {
            None
        } else {
            Some(Duration::from_secs(self.config.auto_ban_minutes.saturating_mul(60)))
        };

        tables.bans.insert(
            id.to_string(),
            BanRecord {
                reason: reason.clone(),
                banned_at: now,
                expires_at: duration.and_then(|d| now.checked_add(d)),
                violation_count: attempts,
            },
        );
        self.persist(&tables);

        warn!("Auto-banned {} ({})", id, reason);
        true
    }

    pub fn get_suspicion(&self, id: &str) -> Option<SuspicionRecord> {
        let tables = self.tables.lock().unwrap();
        tables.suspicion.get(id).cloned()
    }

    /// Current non-expired bans.
    pub fn get_all_banned(&self) -> Vec<(String, BanRecord)> {
        let tables = self.tables.lock().unwrap();
        tables
            .bans
            .iter()
            .filter(|(_, record)| !record.is_expired())
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    pub fn get_all_suspicious(&self) -> Vec<(String, SuspicionRecord)> {
        let tables = self.tables.lock().unwrap();
        tables
            .suspicion
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// (banned, suspicious) counts for the stats surface.
    pub fn counts(&self) -> (usize, usize) {
        let tables = self.tables.lock().unwrap();
        let banned = tables.bans.values().filter(|r| !r.is_expired()).count();
        (banned, tables.suspicion.len())
    }

    /// Remove expired bans and idle suspicion records. Persists only when
    /// the ban table changed. Returns (bans removed, suspicions evicted).
    pub fn sweep(&self) -> (usize, usize) {
        let mut tables = self.tables.lock().unwrap();

        let bans_before = tables.bans.len();
        tables.bans.retain(|_, record| !record.is_expired());
        let bans_removed = bans_before - tables.bans.len();

        let idle_cutoff = SystemTime::now() - self.config.idle_eviction;
        let suspicion_before = tables.suspicion.len();
        tables
            .suspicion
            .retain(|_, record| record.last_seen > idle_cutoff);
        let suspicions_evicted = suspicion_before - tables.suspicion.len();

        if bans_removed > 0 {
            self.persist(&tables);
        }
        if bans_removed > 0 || suspicions_evicted > 0 {
            debug!(
                "Sweep removed {} expired ban(s), {} idle suspicion record(s)",
                bans_removed, suspicions_evicted
            );
        }

        (bans_removed, suspicions_evicted)
    }

    pub fn sweep_interval(&self) -> Duration {
        self.config.sweep_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RecordStoreConfig {
        RecordStoreConfig::default()
    }

    #[test]
    fn test_clean_client_is_not_banned() {
        let store = IpRecordStore::new(test_config());
        assert!(!store.is_banned("10.0.0.1"));
        assert!(store.get_ban_info("10.0.0.1").is_none());
    }

    #[test]
    fn test_permanent_and_timed_bans() {
        let store = IpRecordStore::new(test_config());

        store.ban("9.9.9.9", "manual", 0);
        let permanent = store.get_ban_info("9.9.9.9").unwrap();
        assert!(permanent.expires_at.is_none());
        assert!(store.is_banned("9.9.9.9"));

        store.ban("1.2.3.4", "manual", 60);
        let timed = store.get_ban_info("1.2.3.4").unwrap();
        let remaining = timed.remaining().unwrap();
        assert!(remaining > Duration::from_secs(59 * 60));
        assert!(remaining <= Duration::from_secs(60 * 60));
    }

    #[test]
    fn test_enormous_duration_collapses_to_permanent() {
        let store = IpRecordStore::new(test_config());

        store.ban("9.9.9.10", "very long", u64::MAX);
        assert!(store.is_banned("9.9.9.10"));
        // Unrepresentable expiry becomes a permanent ban, never a panic
        assert!(store.get_ban_info("9.9.9.10").unwrap().expires_at.is_none());
    }

    #[test]
    fn test_unban_is_idempotent() {
        let store = IpRecordStore::new(test_config());

        assert!(!store.unban("10.0.0.2"));

        store.ban("10.0.0.2", "manual", 10);
        assert!(store.unban("10.0.0.2"));
        assert!(!store.is_banned("10.0.0.2"));
        assert!(!store.unban("10.0.0.2"));
    }

    #[test]
    fn test_ban_expiry_lazy_removal() {
        let store = IpRecordStore::new(test_config());

        store.ban_for("10.0.0.3", "short", Some(Duration::from_millis(20)));
        assert!(store.is_banned("10.0.0.3"));

        std::thread::sleep(Duration::from_millis(40));
        assert!(!store.is_banned("10.0.0.3"));
        assert!(store.get_all_banned().is_empty());
    }

    #[test]
    fn test_score_threshold_auto_ban() {
        let store = IpRecordStore::new(test_config());
        let id = "10.0.0.4";

        // 5 x 50 = 250, below the 300 threshold
        for _ in 0..5 {
            assert!(!store.record_suspicious_activity(id, ThreatKind::SqlInjection));
        }
        assert!(!store.is_banned(id));

        // 6th crosses 300
        assert!(store.record_suspicious_activity(id, ThreatKind::SqlInjection));
        assert!(store.is_banned(id));

        let ban = store.get_ban_info(id).unwrap();
        assert_eq!(ban.reason, "automatic: 6 attempts, score 300");
    }

    #[test]
    fn test_attempt_threshold_auto_ban() {
        let store = IpRecordStore::new(test_config());
        let id = "10.0.0.5";

        // 19 x 5 = 95 score, attempts below 20
        for _ in 0..19 {
            assert!(!store.record_suspicious_activity(id, ThreatKind::InvalidInput));
        }

        // 20th attempt crosses the attempt threshold
        assert!(store.record_suspicious_activity(id, ThreatKind::InvalidInput));
        assert!(store.is_banned(id));
    }

    #[test]
    fn test_promotion_clears_suspicion() {
        let store = IpRecordStore::new(test_config());
        let id = "10.0.0.6";

        for _ in 0..6 {
            store.record_suspicious_activity(id, ThreatKind::SqlInjection);
        }

        // Never simultaneously suspected and banned
        assert!(store.is_banned(id));
        assert!(store.get_suspicion(id).is_none());
    }

    #[test]
    fn test_score_is_monotonic_until_ban() {
        let store = IpRecordStore::new(test_config());
        let id = "10.0.0.7";

        let mut last_score = 0;
        for _ in 0..5 {
            store.record_suspicious_activity(id, ThreatKind::Xss);
            let record = store.get_suspicion(id).unwrap();
            assert!(record.score > last_score);
            last_score = record.score;
        }
    }

    #[test]
    fn test_threat_history_is_bounded() {
        let mut config = test_config();
        config.threat_history_cap = 3;
        // Keep thresholds out of the way
        config.score_threshold = 10_000;
        config.attempt_threshold = 10_000;

        let store = IpRecordStore::new(config);
        let id = "10.0.0.8";

        for _ in 0..10 {
            store.record_suspicious_activity(id, ThreatKind::InvalidInput);
        }

        let record = store.get_suspicion(id).unwrap();
        assert_eq!(record.threat_history.len(), 3);
        assert_eq!(record.attempts, 10);
    }

    #[test]
    fn test_unknown_kind_uses_fallback_weight() {
        let store = IpRecordStore::new(test_config());
        let id = "10.0.0.9";

        store.record_suspicious_activity(id, ThreatKind::PossibleScan);
        let record = store.get_suspicion(id).unwrap();
        assert_eq!(record.score, 15);
    }

    #[test]
    fn test_sweep_evicts_idle_suspicion() {
        let mut config = test_config();
        config.idle_eviction = Duration::from_millis(10);
        let store = IpRecordStore::new(config);

        store.record_suspicious_activity("10.0.0.10", ThreatKind::InvalidInput);
        std::thread::sleep(Duration::from_millis(30));

        let (_, evicted) = store.sweep();
        assert_eq!(evicted, 1);
        assert!(store.get_suspicion("10.0.0.10").is_none());
    }

    #[test]
    fn test_sweep_removes_expired_bans() {
        let store = IpRecordStore::new(test_config());

        store.ban_for("10.0.0.11", "short", Some(Duration::from_millis(10)));
        store.ban("10.0.0.12", "long", 60);
        std::thread::sleep(Duration::from_millis(30));

        let (removed, _) = store.sweep();
        assert_eq!(removed, 1);
        assert_eq!(store.get_all_banned().len(), 1);
    }

    #[test]
    fn test_missing_persistence_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.persistence_path = Some(dir.path().join("bans.json"));

        let store = IpRecordStore::new(config);
        assert_eq!(store.counts(), (0, 0));
    }

    #[test]
    fn test_corrupt_persistence_file_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bans.json");
        std::fs::write(&path, "{not json at all").unwrap();

        let mut config = test_config();
        config.persistence_path = Some(path);

        let store = IpRecordStore::new(config);
        assert_eq!(store.counts(), (0, 0));
    }
}
