//! Ban Manager
//!
//! Thin orchestration layer over the record store. Every other component
//! (pipeline, rate limiter, management API) mutates ban state through this
//! type only, so escalations from different code paths cannot race each
//! other past the store's locking.

use super::store::{BanRecord, IpRecordStore};
use super::ThreatKind;
use std::sync::Arc;
use tracing::{debug, info};

pub struct BanManager {
    store: Arc<IpRecordStore>,
}

impl BanManager {
    pub fn new(store: Arc<IpRecordStore>) -> Self {
        Self { store }
    }

    /// Gate check at the top of the pipeline: the active ban for this client,
    /// if any. Lazy expiry happens inside the store.
    pub fn check_and_reject(&self, id: &str) -> Option<BanRecord> {
        if self.store.is_banned(id) {
            self.store.get_ban_info(id)
        } else {
            None
        }
    }

    pub fn ban(&self, id: &str, reason: &str, duration_minutes: u64) -> BanRecord {
        info!(
            "Issuing ban for {} ({}, {} min)",
            id,
            reason,
            if duration_minutes == 0 {
                "permanent".to_string()
            } else {
                duration_minutes.to_string()
            }
        );
        self.store.ban(id, reason, duration_minutes)
    }

    pub fn unban(&self, id: &str) -> bool {
        let removed = self.store.unban(id);
        if !removed {
            debug!("Unban requested for {} but no ban exists", id);
        }
        removed
    }

    /// Record a violation, returning true iff the client is now banned.
    pub fn record_suspicious_activity(&self, id: &str, kind: ThreatKind) -> bool {
        let should_ban = self.store.record_suspicious_activity(id, kind);
        if should_ban {
            info!("Suspicion threshold crossed for {} on {}", id, kind);
        }
        should_ban
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::store::RecordStoreConfig;

    fn manager() -> BanManager {
        BanManager::new(Arc::new(IpRecordStore::new(RecordStoreConfig::default())))
    }

    #[test]
    fn test_check_and_reject_clean_client() {
        let manager = manager();
        assert!(manager.check_and_reject("172.16.0.1").is_none());
    }

    #[test]
    fn test_check_and_reject_after_ban() {
        let manager = manager();

        manager.ban("172.16.0.2", "manual test", 30);
        let ban = manager.check_and_reject("172.16.0.2").unwrap();
        assert_eq!(ban.reason, "manual test");

        assert!(manager.unban("172.16.0.2"));
        assert!(manager.check_and_reject("172.16.0.2").is_none());
    }

    #[test]
    fn test_escalation_through_manager() {
        let manager = manager();
        let id = "172.16.0.3";

        for _ in 0..5 {
            assert!(!manager.record_suspicious_activity(id, ThreatKind::SqlInjection));
        }
        assert!(manager.record_suspicious_activity(id, ThreatKind::SqlInjection));
        assert!(manager.check_and_reject(id).is_some());
    }
}
