// Lock statistics
// Keeps an in-process snapshot and mirrors every update to the `metrics` facade

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};

use super::response::LockResponseFlag;

pub const LOCK_ACQUIRE_TOTAL: &str = "clasp_lock_acquire_total";
pub const LOCK_RELEASE_TOTAL: &str = "clasp_lock_release_total";
pub const LOCK_REMOTE_REQUESTS_TOTAL: &str = "clasp_lock_remote_requests_total";
pub const LOCK_HELD: &str = "clasp_lock_held";

/// Point-in-time lock statistics of one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStats {
    pub acquisitions: u64,
    pub failed_acquisitions: u64,
    pub releases: u64,
    pub remote_ok: u64,
    pub remote_rejects: u64,
    pub remote_fails: u64,
    /// Categories this node currently holds
    pub held: i64,
}

#[derive(Default)]
pub(crate) struct LockStatsCollector {
    acquisitions: AtomicU64,
    failed_acquisitions: AtomicU64,
    releases: AtomicU64,
    remote_ok: AtomicU64,
    remote_rejects: AtomicU64,
    remote_fails: AtomicU64,
    held: AtomicI64,
}

impl LockStatsCollector {
    pub fn record_acquire(&self, acquired: bool) {
        if acquired {
            self.acquisitions.fetch_add(1, Ordering::Relaxed);
            let held = self.held.fetch_add(1, Ordering::Relaxed) + 1;
            counter!(LOCK_ACQUIRE_TOTAL, "result" => "acquired").increment(1);
            gauge!(LOCK_HELD).set(held as f64);
        } else {
            self.failed_acquisitions.fetch_add(1, Ordering::Relaxed);
            counter!(LOCK_ACQUIRE_TOTAL, "result" => "rejected").increment(1);
        }
    }

    /// A lock held by this node ended, by unlock or by yielding it away
    pub fn record_release(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        let held = self.held.fetch_sub(1, Ordering::Relaxed) - 1;
        counter!(LOCK_RELEASE_TOTAL).increment(1);
        gauge!(LOCK_HELD).set(held.max(0) as f64);
    }

    pub fn record_remote(&self, flag: LockResponseFlag) {
        let slot = match flag {
            LockResponseFlag::Ok => &self.remote_ok,
            LockResponseFlag::Reject => &self.remote_rejects,
            LockResponseFlag::Fail => &self.remote_fails,
        };
        slot.fetch_add(1, Ordering::Relaxed);
        counter!(LOCK_REMOTE_REQUESTS_TOTAL, "flag" => flag.as_str()).increment(1);
    }

    /// Forget held locks, used when the service stops
    pub fn reset_held(&self) {
        self.held.store(0, Ordering::Relaxed);
        gauge!(LOCK_HELD).set(0.0);
    }

    pub fn snapshot(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            failed_acquisitions: self.failed_acquisitions.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            remote_ok: self.remote_ok.load(Ordering::Relaxed),
            remote_rejects: self.remote_rejects.load(Ordering::Relaxed),
            remote_fails: self.remote_fails.load(Ordering::Relaxed),
            held: self.held.load(Ordering::Relaxed),
        }
    }
}
