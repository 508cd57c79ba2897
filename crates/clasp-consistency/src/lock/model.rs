//! Cluster lock state model
//!
//! Each node keeps one `ClusterLockState` per lock category. The state is this
//! node's view only; views on different nodes are kept consistent by the lock
//! protocol, never by shared memory.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use clasp_common::{ClusterNode, LockId, current_timestamp};

/// Lock status as seen by one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockStatus {
    /// Nobody holds or claims the lock
    #[default]
    Unlocked,
    /// A remote node's claim is being evaluated or was granted by this node
    RemoteLocking,
    /// This node is asking the cluster for the lock
    LocalLocking,
    /// `holder` owns the lock cluster-wide
    Locked,
    /// The owning service stopped; the state must not be used any more
    Invalid,
}

impl std::fmt::Display for LockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LockStatus::Unlocked => "UNLOCKED",
            LockStatus::RemoteLocking => "REMOTE_LOCKING",
            LockStatus::LocalLocking => "LOCAL_LOCKING",
            LockStatus::Locked => "LOCKED",
            LockStatus::Invalid => "INVALID",
        };
        f.write_str(name)
    }
}

/// One node's view of a lock category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterLockState {
    lock_id: LockId,
    status: LockStatus,
    /// Cluster-wide owner, present only while `Locked`
    holder: Option<ClusterNode>,
    /// Node with an in-flight claim while `RemoteLocking` or `LocalLocking`
    claimant: Option<ClusterNode>,
    /// Newest acquisition attempt of the owner seen by this node, 0 when unowned
    attempt: u64,
    /// Incremented on every transition
    version: u64,
    /// Unix millis of the last transition
    last_changed: i64,
}

impl ClusterLockState {
    pub fn new(lock_id: LockId) -> Self {
        Self {
            lock_id,
            status: LockStatus::Unlocked,
            holder: None,
            claimant: None,
            attempt: 0,
            version: 0,
            last_changed: current_timestamp(),
        }
    }

    pub fn lock_id(&self) -> &LockId {
        &self.lock_id
    }

    pub fn status(&self) -> LockStatus {
        self.status
    }

    pub fn holder(&self) -> Option<&ClusterNode> {
        self.holder.as_ref()
    }

    pub fn claimant(&self) -> Option<&ClusterNode> {
        self.claimant.as_ref()
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Remember a newer acquisition attempt by the current owner
    pub fn observe_attempt(&mut self, attempt: u64) {
        self.attempt = self.attempt.max(attempt);
    }

    /// Whether a release sent for `attempt` may clear the current owner.
    /// Releases of attempts older than the last grant are stale.
    pub fn accepts_release(&self, attempt: u64) -> bool {
        attempt >= self.attempt
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_changed(&self) -> i64 {
        self.last_changed
    }

    pub fn is_held_by(&self, node: &ClusterNode) -> bool {
        self.status == LockStatus::Locked && self.holder.as_ref() == Some(node)
    }

    pub fn is_claimed_by(&self, node: &ClusterNode) -> bool {
        matches!(
            self.status,
            LockStatus::RemoteLocking | LockStatus::LocalLocking
        ) && self.claimant.as_ref() == Some(node)
    }

    /// The node a conflicting request should be told about: the holder, else the claimant
    pub fn owner(&self) -> Option<&ClusterNode> {
        self.holder.as_ref().or(self.claimant.as_ref())
    }

    /// `Unlocked -> LocalLocking`. Returns false if the lock is not free.
    pub fn begin_local_locking(&mut self, me: &ClusterNode) -> bool {
        if self.status != LockStatus::Unlocked {
            return false;
        }
        self.claimant = Some(me.clone());
        self.attempt = 0;
        self.transition(LockStatus::LocalLocking);
        true
    }

    /// Track a remote claim. Allowed from `Unlocked`, and from `LocalLocking`
    /// when this node concedes a race to `caller`.
    pub fn begin_remote_locking(&mut self, caller: &ClusterNode) -> bool {
        if !matches!(self.status, LockStatus::Unlocked | LockStatus::LocalLocking) {
            return false;
        }
        if self.claimant.as_ref() != Some(caller) {
            self.attempt = 0;
        }
        self.claimant = Some(caller.clone());
        self.transition(LockStatus::RemoteLocking);
        true
    }

    /// Record `holder` as the cluster-wide owner
    pub fn record_lock_holder(&mut self, holder: &ClusterNode) {
        if self.owner() != Some(holder) {
            self.attempt = 0;
        }
        self.holder = Some(holder.clone());
        self.claimant = None;
        self.transition(LockStatus::Locked);
    }

    /// Back to `Unlocked`, returning the previous holder or claimant
    pub fn release(&mut self) -> Option<ClusterNode> {
        let previous = self.holder.take().or_else(|| self.claimant.take());
        self.claimant = None;
        self.attempt = 0;
        if self.status != LockStatus::Invalid {
            self.transition(LockStatus::Unlocked);
        }
        previous
    }

    /// Mark the state unusable; later transitions are refused
    pub fn invalidate(&mut self) {
        self.holder = None;
        self.claimant = None;
        self.attempt = 0;
        self.transition(LockStatus::Invalid);
    }

    fn transition(&mut self, status: LockStatus) {
        self.status = status;
        self.version += 1;
        self.last_changed = current_timestamp();
    }
}

/// A lock state shared between the tasks that act on one category
pub type SharedLockState = Arc<Mutex<ClusterLockState>>;

/// Map from lock category to this node's state for it
#[derive(Default)]
pub struct ClusterLockStore {
    states: DashMap<LockId, SharedLockState>,
}

impl ClusterLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the state for `lock_id`, creating it when `create` is set
    pub fn get(&self, lock_id: &LockId, create: bool) -> Option<SharedLockState> {
        if create {
            return Some(self.get_or_create(lock_id));
        }
        self.states.get(lock_id).map(|state| state.value().clone())
    }

    pub fn get_or_create(&self, lock_id: &LockId) -> SharedLockState {
        let state = self
            .states
            .entry(lock_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ClusterLockState::new(lock_id.clone()))));
        state.value().clone()
    }

    pub fn lock_ids(&self) -> Vec<LockId> {
        self.states.iter().map(|e| e.key().clone()).collect()
    }

    pub fn states(&self) -> Vec<SharedLockState> {
        self.states.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Invalidate and drop every state
    pub fn clear(&self) {
        for state in self.states() {
            state.lock().invalidate();
        }
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str) -> ClusterNode {
        ClusterNode::new(name)
    }

    #[test]
    fn test_local_locking_then_locked() {
        let me = node("a");
        let mut state = ClusterLockState::new(LockId::from("x"));

        assert!(state.begin_local_locking(&me));
        assert_eq!(state.status(), LockStatus::LocalLocking);
        assert!(state.is_claimed_by(&me));
        assert!(state.holder().is_none());

        // Lock is not free any more
        assert!(!state.begin_local_locking(&me));

        state.record_lock_holder(&me);
        assert!(state.is_held_by(&me));
        assert!(state.claimant().is_none());

        assert_eq!(state.release(), Some(me));
        assert_eq!(state.status(), LockStatus::Unlocked);
        assert!(state.owner().is_none());
    }

    #[test]
    fn test_remote_locking_transitions() {
        let me = node("a");
        let caller = node("b");
        let mut state = ClusterLockState::new(LockId::from("x"));

        assert!(state.begin_remote_locking(&caller));
        assert_eq!(state.owner(), Some(&caller));
        assert!(!state.begin_remote_locking(&me));

        state.record_lock_holder(&caller);
        assert!(!state.begin_remote_locking(&me));
        assert!(!state.begin_local_locking(&me));
    }

    #[test]
    fn test_concede_local_race() {
        let me = node("b");
        let winner = node("a");
        let mut state = ClusterLockState::new(LockId::from("x"));

        assert!(state.begin_local_locking(&me));
        assert!(state.begin_remote_locking(&winner));
        assert!(state.is_claimed_by(&winner));
        assert!(!state.is_claimed_by(&me));
    }

    #[test]
    fn test_stale_release_is_refused() {
        let caller = node("b");
        let mut state = ClusterLockState::new(LockId::from("x"));

        state.begin_remote_locking(&caller);
        state.observe_attempt(3);
        state.record_lock_holder(&caller);
        assert_eq!(state.attempt(), 3);

        // A later attempt by the same holder is granted again
        state.observe_attempt(5);
        state.observe_attempt(4);
        assert_eq!(state.attempt(), 5);
        assert!(!state.accepts_release(3));
        assert!(state.accepts_release(5));

        // A new owner starts from scratch
        state.release();
        assert_eq!(state.attempt(), 0);
        state.record_lock_holder(&node("c"));
        assert!(state.accepts_release(1));
    }

    #[test]
    fn test_version_bumps() {
        let me = node("a");
        let mut state = ClusterLockState::new(LockId::from("x"));
        let start = state.version();

        state.begin_local_locking(&me);
        state.record_lock_holder(&me);
        state.release();

        assert_eq!(state.version(), start + 3);
    }

    #[test]
    fn test_invalid_is_terminal() {
        let me = node("a");
        let mut state = ClusterLockState::new(LockId::from("x"));
        state.invalidate();

        assert!(!state.begin_local_locking(&me));
        assert!(!state.begin_remote_locking(&me));
        state.release();
        assert_eq!(state.status(), LockStatus::Invalid);
    }

    #[test]
    fn test_store_get_with_and_without_create() {
        let store = ClusterLockStore::new();
        let id = LockId::from("x");

        assert!(store.get(&id, false).is_none());
        let created = store.get(&id, true).unwrap();
        let fetched = store.get(&id, false).unwrap();
        assert!(Arc::ptr_eq(&created, &fetched));
        assert!(Arc::ptr_eq(&created, &store.get_or_create(&id)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_clear_invalidates() {
        let store = ClusterLockStore::new();
        let state = store.get_or_create(&LockId::from("x"));

        store.clear();

        assert!(store.is_empty());
        assert_eq!(state.lock().status(), LockStatus::Invalid);
    }
}
