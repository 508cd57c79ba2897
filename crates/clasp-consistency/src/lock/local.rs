//! Local lock handlers
//!
//! A `LocalLockHandler` keeps the single-node bookkeeping behind a cluster lock.
//! The cluster lock support calls it when cluster-level ownership of a
//! category starts (`lock_from_cluster`) or ends (`unlock_from_cluster`).
//!
//! - [`SharedLocalLockHandler`]: many local holders at once; the cluster lock
//!   is refused while any local hold exists, and local holds are refused while
//!   a cluster holder is recorded.
//! - [`ExclusiveLocalLockHandler`]: local code may only use a category while
//!   this node is the cluster holder; handing the lock to another node waits
//!   for local users to leave.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::debug;

use clasp_common::{ClaspError, ClusterNode, LockId};

/// Local bookkeeping driven by the cluster lock protocol
#[async_trait]
pub trait LocalLockHandler: Send + Sync {
    /// Record that `caller` holds the cluster lock for `lock_id`.
    ///
    /// May wait up to `timeout` for local users; fails when the lock cannot be
    /// handed to `caller`.
    async fn lock_from_cluster(
        &self,
        lock_id: &LockId,
        caller: &ClusterNode,
        timeout: Duration,
    ) -> Result<(), ClaspError>;

    /// Forget that `caller` holds the cluster lock. Idempotent, never blocks.
    fn unlock_from_cluster(&self, lock_id: &LockId, caller: &ClusterNode);

    /// Node currently recorded as cluster holder
    fn lock_holder(&self, lock_id: &LockId) -> Option<ClusterNode>;
}

#[derive(Debug, Default)]
struct SharedEntry {
    local_holds: usize,
    cluster_holder: Option<ClusterNode>,
}

impl SharedEntry {
    fn is_idle(&self) -> bool {
        self.local_holds == 0 && self.cluster_holder.is_none()
    }
}

/// Local handler for the non-globally-exclusive policy
#[derive(Debug, Default)]
pub struct SharedLocalLockHandler {
    entries: DashMap<LockId, SharedEntry>,
}

impl SharedLocalLockHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Take a shared local lock on `lock_id`.
    ///
    /// Fails while any node holds the cluster-wide lock on the category.
    pub fn try_lock_locally(self: &Arc<Self>, lock_id: &LockId) -> Result<LocalLockGuard, ClaspError> {
        let mut entry = self.entries.entry(lock_id.clone()).or_default();
        if let Some(holder) = &entry.cluster_holder {
            return Err(ClaspError::LockHeld {
                lock_id: lock_id.clone(),
                holder: Some(holder.clone()),
            });
        }
        entry.local_holds += 1;
        debug!(lock_id = %lock_id, holds = entry.local_holds, "Local lock taken");

        Ok(LocalLockGuard {
            handler: self.clone(),
            lock_id: lock_id.clone(),
        })
    }

    pub fn local_hold_count(&self, lock_id: &LockId) -> usize {
        self.entries
            .get(lock_id)
            .map(|e| e.local_holds)
            .unwrap_or(0)
    }

    fn unlock_locally(&self, lock_id: &LockId) {
        if let Some(mut entry) = self.entries.get_mut(lock_id) {
            entry.local_holds = entry.local_holds.saturating_sub(1);
            debug!(lock_id = %lock_id, holds = entry.local_holds, "Local lock released");
        }
        self.entries.remove_if(lock_id, |_, e| e.is_idle());
    }
}

#[async_trait]
impl LocalLockHandler for SharedLocalLockHandler {
    async fn lock_from_cluster(
        &self,
        lock_id: &LockId,
        caller: &ClusterNode,
        _timeout: Duration,
    ) -> Result<(), ClaspError> {
        let mut entry = self.entries.entry(lock_id.clone()).or_default();

        if let Some(holder) = &entry.cluster_holder {
            if holder == caller {
                return Ok(());
            }
            return Err(ClaspError::LockHeld {
                lock_id: lock_id.clone(),
                holder: Some(holder.clone()),
            });
        }

        if entry.local_holds > 0 {
            return Err(ClaspError::LockHeld {
                lock_id: lock_id.clone(),
                holder: None,
            });
        }

        entry.cluster_holder = Some(caller.clone());
        Ok(())
    }

    fn unlock_from_cluster(&self, lock_id: &LockId, caller: &ClusterNode) {
        if let Some(mut entry) = self.entries.get_mut(lock_id)
            && entry.cluster_holder.as_ref() == Some(caller)
        {
            entry.cluster_holder = None;
        }
        self.entries.remove_if(lock_id, |_, e| e.is_idle());
    }

    fn lock_holder(&self, lock_id: &LockId) -> Option<ClusterNode> {
        self.entries
            .get(lock_id)
            .and_then(|e| e.cluster_holder.clone())
    }
}

/// A shared local lock; released on drop
#[must_use = "the local lock is released when the guard is dropped"]
pub struct LocalLockGuard {
    handler: Arc<SharedLocalLockHandler>,
    lock_id: LockId,
}

impl LocalLockGuard {
    pub fn lock_id(&self) -> &LockId {
        &self.lock_id
    }
}

impl Drop for LocalLockGuard {
    fn drop(&mut self) {
        self.handler.unlock_locally(&self.lock_id);
    }
}

/// Wait bound used when a yield timeout does not fit the clock
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

#[derive(Debug, Default)]
struct ExclusiveEntry {
    cluster_holder: Option<ClusterNode>,
    in_use: usize,
}

/// Local handler for the globally exclusive (yielding) policy
pub struct ExclusiveLocalLockHandler {
    local: ClusterNode,
    entries: DashMap<LockId, ExclusiveEntry>,
    released: Notify,
}

impl ExclusiveLocalLockHandler {
    pub fn new(local: ClusterNode) -> Arc<Self> {
        Arc::new(Self {
            local,
            entries: DashMap::new(),
            released: Notify::new(),
        })
    }

    /// Start using `lock_id` locally. Only allowed while this node is the cluster holder.
    pub fn enter(self: &Arc<Self>, lock_id: &LockId) -> Result<ExclusiveUseGuard, ClaspError> {
        let mut entry = self.entries.entry(lock_id.clone()).or_default();
        if entry.cluster_holder.as_ref() != Some(&self.local) {
            return Err(ClaspError::LockHeld {
                lock_id: lock_id.clone(),
                holder: entry.cluster_holder.clone(),
            });
        }
        entry.in_use += 1;

        Ok(ExclusiveUseGuard {
            handler: self.clone(),
            lock_id: lock_id.clone(),
        })
    }

    pub fn in_use(&self, lock_id: &LockId) -> usize {
        self.entries.get(lock_id).map(|e| e.in_use).unwrap_or(0)
    }

    fn leave(&self, lock_id: &LockId) {
        let idle = match self.entries.get_mut(lock_id) {
            Some(mut entry) => {
                entry.in_use = entry.in_use.saturating_sub(1);
                entry.in_use == 0
            }
            None => true,
        };
        if idle {
            self.released.notify_waiters();
        }
    }

    /// Try to hand the lock to `caller` without waiting. `None` means local users must leave first.
    fn try_hand_over(&self, lock_id: &LockId, caller: &ClusterNode) -> Option<Result<(), ClaspError>> {
        let mut entry = self.entries.entry(lock_id.clone()).or_default();
        match &entry.cluster_holder {
            Some(holder) if holder == caller => return Some(Ok(())),
            Some(holder) if holder != &self.local => {
                return Some(Err(ClaspError::LockHeld {
                    lock_id: lock_id.clone(),
                    holder: Some(holder.clone()),
                }));
            }
            _ => {}
        }

        if entry.in_use > 0 && caller != &self.local {
            return None;
        }
        entry.cluster_holder = Some(caller.clone());
        Some(Ok(()))
    }
}

#[async_trait]
impl LocalLockHandler for ExclusiveLocalLockHandler {
    async fn lock_from_cluster(
        &self,
        lock_id: &LockId,
        caller: &ClusterNode,
        timeout: Duration,
    ) -> Result<(), ClaspError> {
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.try_hand_over(lock_id, caller) {
                return result;
            }

            debug!(lock_id = %lock_id, caller = %caller, "Waiting for local users before yielding");
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(ClaspError::Timeout(
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ));
            }
        }
    }

    fn unlock_from_cluster(&self, lock_id: &LockId, caller: &ClusterNode) {
        if let Some(mut entry) = self.entries.get_mut(lock_id)
            && entry.cluster_holder.as_ref() == Some(caller)
        {
            entry.cluster_holder = None;
        }
        self.entries
            .remove_if(lock_id, |_, e| e.cluster_holder.is_none() && e.in_use == 0);
    }

    fn lock_holder(&self, lock_id: &LockId) -> Option<ClusterNode> {
        self.entries
            .get(lock_id)
            .and_then(|e| e.cluster_holder.clone())
    }
}

/// Local use of an exclusively held lock; ends on drop
#[must_use = "local use ends when the guard is dropped"]
pub struct ExclusiveUseGuard {
    handler: Arc<ExclusiveLocalLockHandler>,
    lock_id: LockId,
}

impl Drop for ExclusiveUseGuard {
    fn drop(&mut self) {
        self.handler.leave(&self.lock_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> LockId {
        LockId::from("x")
    }

    #[tokio::test]
    async fn test_shared_local_holds_block_cluster() {
        let handler = SharedLocalLockHandler::new();
        let remote = ClusterNode::new("b");

        let first = handler.try_lock_locally(&id()).unwrap();
        let second = handler.try_lock_locally(&id()).unwrap();
        assert_eq!(handler.local_hold_count(&id()), 2);

        let result = handler
            .lock_from_cluster(&id(), &remote, Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(ClaspError::LockHeld { holder: None, .. })));

        drop(first);
        drop(second);
        assert_eq!(handler.local_hold_count(&id()), 0);

        handler
            .lock_from_cluster(&id(), &remote, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(handler.lock_holder(&id()), Some(remote));
    }

    #[tokio::test]
    async fn test_shared_cluster_holder_blocks_local() {
        let handler = SharedLocalLockHandler::new();
        let remote = ClusterNode::new("b");

        handler
            .lock_from_cluster(&id(), &remote, Duration::ZERO)
            .await
            .unwrap();
        // Same caller again is fine, another is not
        handler
            .lock_from_cluster(&id(), &remote, Duration::ZERO)
            .await
            .unwrap();
        assert!(
            handler
                .lock_from_cluster(&id(), &ClusterNode::new("c"), Duration::ZERO)
                .await
                .is_err()
        );
        assert!(handler.try_lock_locally(&id()).is_err());

        // Unlock by a non-holder is ignored
        handler.unlock_from_cluster(&id(), &ClusterNode::new("c"));
        assert!(handler.try_lock_locally(&id()).is_err());

        handler.unlock_from_cluster(&id(), &remote);
        handler.unlock_from_cluster(&id(), &remote);
        assert!(handler.lock_holder(&id()).is_none());
        let _guard = handler.try_lock_locally(&id()).unwrap();
    }

    #[tokio::test]
    async fn test_exclusive_enter_requires_holder() {
        let me = ClusterNode::new("a");
        let handler = ExclusiveLocalLockHandler::new(me.clone());

        assert!(handler.enter(&id()).is_err());

        handler
            .lock_from_cluster(&id(), &me, Duration::ZERO)
            .await
            .unwrap();
        let guard = handler.enter(&id()).unwrap();
        assert_eq!(handler.in_use(&id()), 1);
        drop(guard);
        assert_eq!(handler.in_use(&id()), 0);
    }

    #[tokio::test]
    async fn test_exclusive_yield_with_unbounded_timeout() {
        let me = ClusterNode::new("a");
        let remote = ClusterNode::new("b");
        let handler = ExclusiveLocalLockHandler::new(me.clone());

        handler
            .lock_from_cluster(&id(), &me, Duration::MAX)
            .await
            .unwrap();
        let guard = handler.enter(&id()).unwrap();

        let waiter = {
            let handler = handler.clone();
            let remote = remote.clone();
            tokio::spawn(async move { handler.lock_from_cluster(&id(), &remote, Duration::MAX).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        waiter.await.unwrap().unwrap();
        assert_eq!(handler.lock_holder(&id()), Some(remote));
    }

    #[tokio::test]
    async fn test_exclusive_yield_waits_for_local_users() {
        let me = ClusterNode::new("a");
        let remote = ClusterNode::new("b");
        let handler = ExclusiveLocalLockHandler::new(me.clone());

        handler
            .lock_from_cluster(&id(), &me, Duration::ZERO)
            .await
            .unwrap();
        let guard = handler.enter(&id()).unwrap();

        // Times out while the guard is alive
        let result = handler
            .lock_from_cluster(&id(), &remote, Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(ClaspError::Timeout(20))));

        let waiter = {
            let handler = handler.clone();
            let remote = remote.clone();
            tokio::spawn(async move {
                handler
                    .lock_from_cluster(&id(), &remote, Duration::from_secs(5))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        waiter.await.unwrap().unwrap();
        assert_eq!(handler.lock_holder(&id()), Some(remote.clone()));
        assert!(handler.enter(&id()).is_err());

        // A second remote node cannot take it from the new holder
        let result = handler
            .lock_from_cluster(&id(), &ClusterNode::new("c"), Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(ClaspError::LockHeld { .. })));
    }
}
