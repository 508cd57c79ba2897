//! Lock policies
//!
//! The acquire/release skeleton in [`ClusterLockSupport`](super::ClusterLockSupport)
//! defers three decisions to a [`ClusterLockPolicy`]: how lock state is looked
//! up, what to answer when a locked category is requested by another node, and
//! what to record once a remote claim is granted.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use clasp_common::{ClaspError, ClusterNode, LockId};

use super::{
    local::LocalLockHandler,
    model::{ClusterLockState, ClusterLockStore, SharedLockState},
    response::RemoteLockResponse,
};

/// Node context handed to policy operations
pub struct PolicyContext<'a> {
    pub local_node: &'a ClusterNode,
    pub local_handler: &'a dyn LocalLockHandler,
}

/// Policy variant selected when a lock support is constructed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockPolicyKind {
    /// Local locks are shared, the cluster lock excludes them all
    #[default]
    NonGloballyExclusive,
    /// One holder cluster-wide, which yields on request
    GloballyExclusive,
}

impl LockPolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockPolicyKind::NonGloballyExclusive => "non-globally-exclusive",
            LockPolicyKind::GloballyExclusive => "globally-exclusive",
        }
    }

    pub fn into_policy(self) -> Arc<dyn ClusterLockPolicy> {
        match self {
            LockPolicyKind::NonGloballyExclusive => Arc::new(NonGloballyExclusivePolicy),
            LockPolicyKind::GloballyExclusive => Arc::new(GloballyExclusivePolicy),
        }
    }
}

impl fmt::Display for LockPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockPolicyKind {
    type Err = ClaspError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "non-globally-exclusive" | "shared" => Ok(LockPolicyKind::NonGloballyExclusive),
            "globally-exclusive" | "exclusive" | "yielding" => Ok(LockPolicyKind::GloballyExclusive),
            other => Err(ClaspError::IllegalArgument(format!(
                "unknown lock policy '{other}'"
            ))),
        }
    }
}

/// Policy-specific steps of the cluster lock protocol
#[async_trait]
pub trait ClusterLockPolicy: Send + Sync {
    fn kind(&self) -> LockPolicyKind;

    /// State used for a lock request on `lock_id`
    fn get_cluster_lock_state(&self, store: &ClusterLockStore, lock_id: &LockId) -> SharedLockState;

    /// Answer `caller`'s request for a category this node records as locked
    /// by someone other than `caller`
    async fn yield_lock(
        &self,
        ctx: &PolicyContext<'_>,
        state: &SharedLockState,
        caller: &ClusterNode,
        timeout: Duration,
    ) -> RemoteLockResponse;

    /// `caller` may become holder: record it and answer
    fn handle_lock_success(
        &self,
        ctx: &PolicyContext<'_>,
        state: &mut ClusterLockState,
        caller: &ClusterNode,
    ) -> RemoteLockResponse;
}

/// Local locks may be held on many nodes at once. The cluster-wide lock
/// excludes every local lock and is never yielded.
pub struct NonGloballyExclusivePolicy;

#[async_trait]
impl ClusterLockPolicy for NonGloballyExclusivePolicy {
    fn kind(&self) -> LockPolicyKind {
        LockPolicyKind::NonGloballyExclusive
    }

    fn get_cluster_lock_state(&self, store: &ClusterLockStore, lock_id: &LockId) -> SharedLockState {
        store.get_or_create(lock_id)
    }

    async fn yield_lock(
        &self,
        ctx: &PolicyContext<'_>,
        state: &SharedLockState,
        _caller: &ClusterNode,
        _timeout: Duration,
    ) -> RemoteLockResponse {
        let state = state.lock();
        RemoteLockResponse::reject(ctx.local_node, state.holder())
    }

    fn handle_lock_success(
        &self,
        ctx: &PolicyContext<'_>,
        state: &mut ClusterLockState,
        caller: &ClusterNode,
    ) -> RemoteLockResponse {
        state.record_lock_holder(caller);
        RemoteLockResponse::ok(ctx.local_node)
    }
}

/// At most one holder cluster-wide. The holder keeps the lock until another
/// node asks for it, then hands it over once local users have left.
pub struct GloballyExclusivePolicy;

#[async_trait]
impl ClusterLockPolicy for GloballyExclusivePolicy {
    fn kind(&self) -> LockPolicyKind {
        LockPolicyKind::GloballyExclusive
    }

    fn get_cluster_lock_state(&self, store: &ClusterLockStore, lock_id: &LockId) -> SharedLockState {
        store.get_or_create(lock_id)
    }

    async fn yield_lock(
        &self,
        ctx: &PolicyContext<'_>,
        state: &SharedLockState,
        caller: &ClusterNode,
        timeout: Duration,
    ) -> RemoteLockResponse {
        let (lock_id, holder) = {
            let state = state.lock();
            (state.lock_id().clone(), state.holder().cloned())
        };
        let Some(holder) = holder else {
            return RemoteLockResponse::reject(ctx.local_node, None);
        };

        // A bystander follows the transfer, the holder's own answer decides it
        let bystander = &holder != ctx.local_node;
        if bystander {
            ctx.local_handler.unlock_from_cluster(&lock_id, &holder);
        }

        if let Err(e) = ctx
            .local_handler
            .lock_from_cluster(&lock_id, caller, timeout)
            .await
        {
            debug!(lock_id = %lock_id, caller = %caller, error = %e, "Lock not yielded");
            if bystander
                && let Err(e) = ctx
                    .local_handler
                    .lock_from_cluster(&lock_id, &holder, Duration::ZERO)
                    .await
            {
                // Local bookkeeping no longer names the holder, so neither may the state
                warn!(lock_id = %lock_id, holder = %holder, error = %e, "Failed to restore lock holder");
                let mut state = state.lock();
                if state.is_held_by(&holder) {
                    state.release();
                }
            }
            return RemoteLockResponse::reject(ctx.local_node, Some(&holder));
        }

        let mut state = state.lock();
        if !state.is_held_by(&holder) {
            // Lost a race while waiting for local users
            let current = state.owner().cloned();
            drop(state);
            ctx.local_handler.unlock_from_cluster(&lock_id, caller);
            return RemoteLockResponse::reject(ctx.local_node, current.as_ref());
        }

        if !bystander {
            info!(lock_id = %lock_id, caller = %caller, "Yielded cluster lock");
        }
        self.handle_lock_success(ctx, &mut state, caller)
    }

    fn handle_lock_success(
        &self,
        ctx: &PolicyContext<'_>,
        state: &mut ClusterLockState,
        caller: &ClusterNode,
    ) -> RemoteLockResponse {
        state.record_lock_holder(caller);
        RemoteLockResponse::ok(ctx.local_node)
    }
}
