//! Cluster lock support
//!
//! `ClusterLockSupport` drives the acquire/release protocol for one node:
//!
//! 1. `lock` marks the category `LocalLocking`, broadcasts `remoteLock` to the
//!    other members and needs an OK from every member that answers. Any REJECT,
//!    FAIL or failed call aborts the attempt; the initiator releases its own
//!    view and broadcasts `releaseRemoteLock` to undo grants.
//! 2. `unlock` releases locally, then broadcasts `releaseRemoteLock`. A failed
//!    broadcast is reported to the caller and the local release is kept.
//! 3. Inbound requests are evaluated against this node's view, with the policy
//!    deciding what a locked category answers.
//!
//! Every acquisition attempt carries a sequence number. Members remember the
//! newest attempt they granted and ignore releases of older ones, so a release
//! overtaken by the next attempt of the same node cannot undo that grant.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use clasp_common::{ClaspError, ClusterNode, DEFAULT_LOCK_SERVICE_NAME, LockId};
use clasp_core::{
    Configuration, MemberReply, MemberResponse, MembershipChange, MembershipListener, Partition,
    Payload,
};

use super::{
    local::LocalLockHandler,
    model::{ClusterLockStore, LockStatus, SharedLockState},
    policy::{ClusterLockPolicy, LockPolicyKind, PolicyContext},
    response::{LockAcquireResult, RemoteLockResponse},
    rpc::{
        LockRpcHandler, RELEASE_REMOTE_LOCK_METHOD, REMOTE_LOCK_METHOD, ReleaseRemoteLockRequest,
        RemoteLockRequest,
    },
    stats::{LockStats, LockStatsCollector},
};

/// Configuration for a cluster lock support
#[derive(Clone, Debug)]
pub struct ClusterLockConfig {
    /// Service name the support registers with the partition
    pub service_name: String,
    pub policy: LockPolicyKind,
    /// Timeout used by [`ClusterLockSupport::try_lock`]
    pub lock_timeout: Duration,
}

impl Default for ClusterLockConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_LOCK_SERVICE_NAME.to_string(),
            policy: LockPolicyKind::default(),
            lock_timeout: Duration::from_secs(30),
        }
    }
}

impl ClusterLockConfig {
    /// Create a ClusterLockConfig from application Configuration
    pub fn from_configuration(config: &Configuration) -> Result<Self, ClaspError> {
        Ok(Self {
            service_name: config.lock_service_name(),
            policy: config.lock_policy().parse()?,
            lock_timeout: Duration::from_millis(config.lock_timeout_ms()?),
        })
    }
}

enum RemoteStep {
    Respond(RemoteLockResponse),
    Claim,
    Yield { held_here: bool },
}

/// Outcome of a `remoteLock` fan-out
#[derive(Default)]
struct Tally {
    rejected_by: Vec<ClusterNode>,
    holder: Option<ClusterNode>,
}

impl Tally {
    fn collect(responses: &[MemberResponse]) -> Self {
        let mut tally = Tally::default();
        for response in responses {
            match &response.reply {
                MemberReply::Ok(payload) => match payload.decode::<RemoteLockResponse>() {
                    Ok(answer) if answer.is_ok() => {}
                    Ok(answer) => {
                        debug!(
                            responder = %response.node,
                            flag = answer.flag.as_str(),
                            holder = ?answer.holder,
                            "Lock request refused"
                        );
                        if tally.holder.is_none() {
                            tally.holder = answer.holder;
                        }
                        tally.rejected_by.push(response.node.clone());
                    }
                    Err(e) => {
                        warn!(responder = %response.node, error = %e, "Undecodable lock response");
                        tally.rejected_by.push(response.node.clone());
                    }
                },
                // Members without the lock service abstain
                MemberReply::NoHandler => {}
                MemberReply::Failed(reason) => {
                    warn!(responder = %response.node, reason = %reason, "Lock request failed on member");
                    tally.rejected_by.push(response.node.clone());
                }
            }
        }
        tally
    }

    fn is_unanimous(&self) -> bool {
        self.rejected_by.is_empty()
    }
}

/// Cluster-wide lock support for one node of a partition
pub struct ClusterLockSupport {
    config: ClusterLockConfig,
    partition: Arc<dyn Partition>,
    local_handler: Arc<dyn LocalLockHandler>,
    policy: Arc<dyn ClusterLockPolicy>,
    store: ClusterLockStore,
    local_node: RwLock<Option<ClusterNode>>,
    membership_listener: Mutex<Option<Arc<dyn MembershipListener>>>,
    attempts: AtomicU64,
    stats: LockStatsCollector,
}

impl ClusterLockSupport {
    /// Create a support using the policy named in `config`
    pub fn new(
        config: ClusterLockConfig,
        partition: Arc<dyn Partition>,
        local_handler: Arc<dyn LocalLockHandler>,
    ) -> Arc<Self> {
        let policy = config.policy.into_policy();
        Self::with_policy(config, partition, local_handler, policy)
    }

    pub fn with_policy(
        config: ClusterLockConfig,
        partition: Arc<dyn Partition>,
        local_handler: Arc<dyn LocalLockHandler>,
        policy: Arc<dyn ClusterLockPolicy>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            partition,
            local_handler,
            policy,
            store: ClusterLockStore::new(),
            local_node: RwLock::new(None),
            membership_listener: Mutex::new(None),
            attempts: AtomicU64::new(0),
            stats: LockStatsCollector::default(),
        })
    }

    pub fn config(&self) -> &ClusterLockConfig {
        &self.config
    }

    pub fn policy_kind(&self) -> LockPolicyKind {
        self.policy.kind()
    }

    /// Local node identity, present between `start` and `stop`
    pub fn local_node(&self) -> Option<ClusterNode> {
        self.local_node.read().clone()
    }

    pub fn is_started(&self) -> bool {
        self.local_node.read().is_some()
    }

    /// Join the lock protocol: take the local node from the partition and
    /// register the RPC handler and membership listener
    pub fn start(self: &Arc<Self>) -> Result<(), ClaspError> {
        let node = self.partition.local_node().ok_or_else(|| {
            ClaspError::IllegalState(format!(
                "partition '{}' has no local node",
                self.partition.name()
            ))
        })?;

        let mut local_node = self.local_node.write();
        if local_node.is_some() {
            return Err(ClaspError::IllegalState(format!(
                "service '{}' is already started",
                self.config.service_name
            )));
        }

        self.partition.register_rpc_handler(
            &self.config.service_name,
            Arc::new(LockRpcHandler::new(Arc::downgrade(self))),
        );

        let listener: Arc<dyn MembershipListener> = Arc::new(LockMembershipListener {
            support: Arc::downgrade(self),
        });
        self.partition.register_membership_listener(listener.clone());
        *self.membership_listener.lock() = Some(listener);

        let request_timeout = self.partition.request_timeout();
        if self.config.lock_timeout > request_timeout {
            warn!(
                lock_timeout = ?self.config.lock_timeout,
                request_timeout = ?request_timeout,
                "Lock timeout exceeds the partition request timeout and will be capped"
            );
        }

        info!(
            node = %node,
            service = %self.config.service_name,
            policy = %self.policy.kind(),
            "Cluster lock support started"
        );
        *local_node = Some(node);
        Ok(())
    }

    /// Leave the lock protocol and invalidate every lock state
    pub fn stop(&self) {
        let Some(node) = self.local_node.write().take() else {
            return;
        };

        self.partition
            .unregister_rpc_handler(&self.config.service_name);
        if let Some(listener) = self.membership_listener.lock().take() {
            self.partition.unregister_membership_listener(&listener);
        }

        for state in self.store.states() {
            let mut state = state.lock();
            if let Some(owner) = state.owner().cloned() {
                self.local_handler
                    .unlock_from_cluster(state.lock_id(), &owner);
            }
            state.invalidate();
        }
        self.store.clear();
        self.stats.reset_held();

        info!(node = %node, service = %self.config.service_name, "Cluster lock support stopped");
    }

    fn require_local_node(&self) -> Result<ClusterNode, ClaspError> {
        self.local_node()
            .ok_or_else(|| ClaspError::not_started(&self.config.service_name))
    }

    fn context<'a>(&'a self, me: &'a ClusterNode) -> PolicyContext<'a> {
        PolicyContext {
            local_node: me,
            local_handler: self.local_handler.as_ref(),
        }
    }

    /// Fetch this node's state for `lock_id`, creating it when `create` is set
    pub fn get_cluster_lock_state(&self, lock_id: &LockId, create: bool) -> Option<SharedLockState> {
        self.store.get(lock_id, create)
    }

    /// Try to acquire the cluster-wide lock with the configured timeout
    pub async fn try_lock(&self, lock_id: &LockId) -> Result<LockAcquireResult, ClaspError> {
        self.lock(lock_id, self.config.lock_timeout).await
    }

    /// Try to acquire the cluster-wide lock on `lock_id`.
    ///
    /// Rejections are reported in the result, never retried. `timeout` bounds
    /// how long members may wait for their local users and is capped at the
    /// partition request timeout, past which a member's answer is lost.
    ///
    /// Ownership is per node: while this node holds the lock, `lock` returns
    /// acquired to every task on it, and one `unlock` releases it for all.
    pub async fn lock(&self, lock_id: &LockId, timeout: Duration) -> Result<LockAcquireResult, ClaspError> {
        let me = self.require_local_node()?;
        let timeout = timeout.min(self.partition.request_timeout());
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let payload = Payload::encode(
            REMOTE_LOCK_METHOD,
            &RemoteLockRequest {
                lock_id: lock_id.clone(),
                caller: me.clone(),
                attempt,
                timeout_millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
        )?;

        let state = self.policy.get_cluster_lock_state(&self.store, lock_id);
        let previous_holder = {
            let mut state = state.lock();
            if state.is_held_by(&me) {
                return Ok(LockAcquireResult::acquired(lock_id));
            }

            let previous = match state.status() {
                LockStatus::Unlocked => None,
                // A yielding holder is asked to hand the lock over
                LockStatus::Locked if self.policy.kind() == LockPolicyKind::GloballyExclusive => {
                    state.release()
                }
                _ => {
                    let owner = state.owner().cloned();
                    drop(state);
                    debug!(lock_id = %lock_id, owner = ?owner, "Lock busy in local view");
                    self.stats.record_acquire(false);
                    return Ok(LockAcquireResult::rejected(lock_id, owner, Vec::new()));
                }
            };
            state.begin_local_locking(&me);
            state.observe_attempt(attempt);
            previous
        };
        if let Some(previous) = &previous_holder {
            self.local_handler.unlock_from_cluster(lock_id, previous);
        }

        debug!(lock_id = %lock_id, attempt, previous = ?previous_holder, "Requesting cluster lock");

        let responses = match self
            .partition
            .call_method_on_cluster(&self.config.service_name, payload, true)
            .await
        {
            Ok(responses) => responses,
            Err(e) => {
                warn!(lock_id = %lock_id, error = %e, "Lock request could not be sent");
                return Ok(self.abort_lock(&me, lock_id, attempt, &state, None, Vec::new()).await);
            }
        };

        let tally = Tally::collect(&responses);
        if !tally.is_unanimous() {
            return Ok(self
                .abort_lock(&me, lock_id, attempt, &state, tally.holder, tally.rejected_by)
                .await);
        }

        if let Err(e) = self
            .local_handler
            .lock_from_cluster(lock_id, &me, timeout)
            .await
        {
            debug!(lock_id = %lock_id, error = %e, "Local handler refused cluster lock");
            let holder = self.local_handler.lock_holder(lock_id);
            return Ok(self
                .abort_lock(&me, lock_id, attempt, &state, holder, vec![me.clone()])
                .await);
        }

        let lost_to = {
            let mut state = state.lock();
            if state.is_claimed_by(&me) {
                state.record_lock_holder(&me);
                None
            } else {
                Some(state.owner().cloned())
            }
        };
        if let Some(owner) = lost_to {
            self.local_handler.unlock_from_cluster(lock_id, &me);
            return Ok(self.abort_lock(&me, lock_id, attempt, &state, owner, Vec::new()).await);
        }

        self.stats.record_acquire(true);
        info!(lock_id = %lock_id, node = %me, "Acquired cluster lock");
        Ok(LockAcquireResult::acquired(lock_id))
    }

    /// Undo a failed acquisition: drop our claim and revoke grants made to us
    async fn abort_lock(
        &self,
        me: &ClusterNode,
        lock_id: &LockId,
        attempt: u64,
        state: &SharedLockState,
        holder: Option<ClusterNode>,
        rejected_by: Vec<ClusterNode>,
    ) -> LockAcquireResult {
        {
            let mut state = state.lock();
            if state.is_claimed_by(me) {
                state.release();
            }
        }

        if let Err(e) = self.broadcast_release(lock_id, me, attempt).await {
            warn!(lock_id = %lock_id, error = %e, "Could not revoke partial lock grants");
        }

        self.stats.record_acquire(false);
        debug!(lock_id = %lock_id, rejected_by = ?rejected_by, "Cluster lock not acquired");
        LockAcquireResult::rejected(lock_id, holder, rejected_by)
    }

    /// Release the cluster-wide lock on `lock_id`.
    ///
    /// A no-op when this node is not the recorded holder. When the release
    /// broadcast fails the error is returned and the local release stands.
    pub async fn unlock(&self, lock_id: &LockId) -> Result<(), ClaspError> {
        let me = self.require_local_node()?;

        let Some(state) = self.get_cluster_lock_state(lock_id, false) else {
            return Ok(());
        };
        let attempt = {
            let mut state = state.lock();
            if !state.is_held_by(&me) {
                debug!(lock_id = %lock_id, "Not the lock holder, nothing to unlock");
                return Ok(());
            }
            let attempt = state.attempt();
            self.local_handler.unlock_from_cluster(lock_id, &me);
            state.release();
            attempt
        };
        self.stats.record_release();
        info!(lock_id = %lock_id, node = %me, "Released cluster lock");

        self.broadcast_release(lock_id, &me, attempt).await.inspect_err(|e| {
            warn!(lock_id = %lock_id, error = %e, "Release broadcast failed, members keep a stale holder");
        })
    }

    async fn broadcast_release(
        &self,
        lock_id: &LockId,
        caller: &ClusterNode,
        attempt: u64,
    ) -> Result<(), ClaspError> {
        let payload = Payload::encode(
            RELEASE_REMOTE_LOCK_METHOD,
            &ReleaseRemoteLockRequest {
                lock_id: lock_id.clone(),
                caller: caller.clone(),
                attempt,
            },
        )?;

        let responses = self
            .partition
            .call_method_on_cluster(&self.config.service_name, payload, true)
            .await
            .map_err(|e| ClaspError::remote_call(RELEASE_REMOTE_LOCK_METHOD, e.to_string()))?;

        let failures: Vec<String> = responses
            .iter()
            .filter_map(|r| match &r.reply {
                MemberReply::Failed(reason) => Some(format!("{}: {}", r.node, reason)),
                _ => None,
            })
            .collect();
        if !failures.is_empty() {
            return Err(ClaspError::remote_call(
                RELEASE_REMOTE_LOCK_METHOD,
                failures.join("; "),
            ));
        }
        Ok(())
    }

    /// Evaluate attempt `attempt` of `caller` to take the cluster-wide lock on `lock_id`
    pub async fn remote_lock(
        &self,
        lock_id: &LockId,
        caller: &ClusterNode,
        attempt: u64,
        timeout: Duration,
    ) -> Result<RemoteLockResponse, ClaspError> {
        let me = self.require_local_node()?;
        let ctx = self.context(&me);
        let state = self.policy.get_cluster_lock_state(&self.store, lock_id);

        let step = {
            let mut state = state.lock();
            match state.status() {
                LockStatus::Unlocked => {
                    state.begin_remote_locking(caller);
                    state.observe_attempt(attempt);
                    RemoteStep::Claim
                }
                LockStatus::RemoteLocking if state.is_claimed_by(caller) => {
                    state.observe_attempt(attempt);
                    RemoteStep::Respond(RemoteLockResponse::ok(&me))
                }
                LockStatus::RemoteLocking => {
                    RemoteStep::Respond(RemoteLockResponse::reject(&me, state.owner()))
                }
                LockStatus::Locked if state.is_held_by(caller) => {
                    state.observe_attempt(attempt);
                    RemoteStep::Respond(RemoteLockResponse::ok(&me))
                }
                LockStatus::Locked => RemoteStep::Yield {
                    held_here: state.is_held_by(&me),
                },
                LockStatus::LocalLocking if self.outranks(&me, caller) => {
                    RemoteStep::Respond(RemoteLockResponse::fail(&me, &me))
                }
                LockStatus::LocalLocking => {
                    debug!(lock_id = %lock_id, caller = %caller, "Conceding lock race");
                    state.begin_remote_locking(caller);
                    state.observe_attempt(attempt);
                    RemoteStep::Claim
                }
                LockStatus::Invalid => RemoteStep::Respond(RemoteLockResponse::reject(&me, None)),
            }
        };

        let response = match step {
            RemoteStep::Respond(response) => response,
            RemoteStep::Claim => self.claim(&ctx, &state, lock_id, caller, timeout).await,
            RemoteStep::Yield { held_here } => {
                let response = self.policy.yield_lock(&ctx, &state, caller, timeout).await;
                if response.is_ok() {
                    let mut state = state.lock();
                    if state.is_held_by(caller) {
                        state.observe_attempt(attempt);
                    }
                }
                if held_here && response.is_ok() {
                    self.stats.record_release();
                }
                response
            }
        };

        self.stats.record_remote(response.flag);
        debug!(
            lock_id = %lock_id,
            caller = %caller,
            flag = response.flag.as_str(),
            "Answered lock request"
        );
        Ok(response)
    }

    /// Hand a claimed category to `caller` through the local handler
    async fn claim(
        &self,
        ctx: &PolicyContext<'_>,
        state: &SharedLockState,
        lock_id: &LockId,
        caller: &ClusterNode,
        timeout: Duration,
    ) -> RemoteLockResponse {
        match self
            .local_handler
            .lock_from_cluster(lock_id, caller, timeout)
            .await
        {
            Ok(()) => {
                let lost_to = {
                    let mut state = state.lock();
                    if state.is_claimed_by(caller) {
                        return self.policy.handle_lock_success(ctx, &mut state, caller);
                    }
                    state.owner().cloned()
                };
                // Released or overtaken while the local handler was busy
                self.local_handler.unlock_from_cluster(lock_id, caller);
                RemoteLockResponse::reject(ctx.local_node, lost_to.as_ref())
            }
            Err(e) => {
                debug!(lock_id = %lock_id, caller = %caller, error = %e, "Local handler refused lock");
                {
                    let mut state = state.lock();
                    if state.is_claimed_by(caller) {
                        state.release();
                    }
                }
                let holder = self.local_handler.lock_holder(lock_id);
                RemoteLockResponse::reject(ctx.local_node, holder.as_ref())
            }
        }
    }

    /// Whether this node wins a race against `caller`: the member earlier in the view wins
    fn outranks(&self, me: &ClusterNode, caller: &ClusterNode) -> bool {
        let view = self.partition.current_view();
        let position = |node: &ClusterNode| view.iter().position(|n| n == node);
        match (position(me), position(caller)) {
            (Some(mine), Some(theirs)) => mine < theirs,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => me < caller,
        }
    }

    /// Forget `caller`'s hold or claim on `lock_id` granted up to `attempt`
    pub fn release_remote_lock(&self, lock_id: &LockId, caller: &ClusterNode, attempt: u64) {
        let Some(state) = self.get_cluster_lock_state(lock_id, false) else {
            return;
        };

        let released = {
            let mut state = state.lock();
            if !(state.is_held_by(caller) || state.is_claimed_by(caller)) {
                false
            } else if state.accepts_release(attempt) {
                state.release();
                true
            } else {
                debug!(
                    lock_id = %lock_id,
                    caller = %caller,
                    attempt,
                    granted = state.attempt(),
                    "Ignoring release of an older attempt"
                );
                false
            }
        };

        if released {
            self.local_handler.unlock_from_cluster(lock_id, caller);
            debug!(lock_id = %lock_id, caller = %caller, "Released remote lock");
        }
    }

    /// Release every hold and claim of members that left the view
    pub fn members_departed(&self, departed: &[ClusterNode]) {
        for state in self.store.states() {
            let released = {
                let mut state = state.lock();
                match state.owner() {
                    Some(owner) if departed.contains(owner) => {
                        let lock_id = state.lock_id().clone();
                        state.release().map(|owner| (lock_id, owner))
                    }
                    _ => None,
                }
            };

            if let Some((lock_id, owner)) = released {
                self.local_handler.unlock_from_cluster(&lock_id, &owner);
                info!(lock_id = %lock_id, owner = %owner, "Released lock of departed member");
            }
        }
    }

    // ===================== Introspection =====================

    /// Holder of `lock_id` in this node's view
    pub fn holder(&self, lock_id: &LockId) -> Option<ClusterNode> {
        self.get_cluster_lock_state(lock_id, false)
            .and_then(|state| state.lock().holder().cloned())
    }

    pub fn status(&self, lock_id: &LockId) -> LockStatus {
        self.get_cluster_lock_state(lock_id, false)
            .map(|state| state.lock().status())
            .unwrap_or_default()
    }

    pub fn lock_ids(&self) -> Vec<LockId> {
        self.store.lock_ids()
    }

    pub fn stats(&self) -> LockStats {
        self.stats.snapshot()
    }
}

/// Reconciles lock states when members leave the partition view
struct LockMembershipListener {
    support: Weak<ClusterLockSupport>,
}

#[async_trait]
impl MembershipListener for LockMembershipListener {
    async fn on_membership_change(&self, change: &MembershipChange) {
        let departed = change.departed_members();
        if departed.is_empty() {
            return;
        }
        if let Some(support) = self.support.upgrade() {
            support.members_departed(departed);
        }
    }
}

#[cfg(test)]
mod tests {
    use clasp_core::{InMemoryGroup, PartitionConfig};

    use super::*;
    use crate::lock::local::SharedLocalLockHandler;

    #[test]
    fn test_cluster_lock_config_default() {
        let config = ClusterLockConfig::default();
        assert_eq!(config.service_name, "ClusterLockSupport");
        assert_eq!(config.policy, LockPolicyKind::NonGloballyExclusive);
        assert_eq!(config.lock_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_cluster_lock_config_from_configuration() {
        let config = config::Config::builder()
            .set_default("clasp.lock.policy", "globally-exclusive")
            .unwrap()
            .set_default("clasp.lock.timeout", 1200)
            .unwrap()
            .build()
            .unwrap();
        let lock_config =
            ClusterLockConfig::from_configuration(&Configuration::from_config(config)).unwrap();

        assert_eq!(lock_config.policy, LockPolicyKind::GloballyExclusive);
        assert_eq!(lock_config.lock_timeout, Duration::from_millis(1200));

        let config = config::Config::builder()
            .set_default("clasp.lock.policy", "majority")
            .unwrap()
            .build()
            .unwrap();
        assert!(ClusterLockConfig::from_configuration(&Configuration::from_config(config)).is_err());

        let config = config::Config::builder()
            .set_default("clasp.lock.timeout", -1)
            .unwrap()
            .build()
            .unwrap();
        assert!(matches!(
            ClusterLockConfig::from_configuration(&Configuration::from_config(config)),
            Err(ClaspError::IllegalArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_single_node_lock_and_unlock() {
        let group = InMemoryGroup::new(PartitionConfig::default());
        let partition = group.join(ClusterNode::new("solo")).await.unwrap();
        let support = ClusterLockSupport::new(
            ClusterLockConfig::default(),
            partition,
            SharedLocalLockHandler::new(),
        );
        support.start().unwrap();
        assert!(support.start().is_err());

        let id = LockId::from("x");
        assert!(support.try_lock(&id).await.unwrap().acquired);
        // Relocking as holder is a success
        assert!(support.try_lock(&id).await.unwrap().acquired);
        assert_eq!(support.holder(&id), Some(ClusterNode::new("solo")));
        assert_eq!(support.stats().held, 1);

        support.unlock(&id).await.unwrap();
        assert_eq!(support.status(&id), LockStatus::Unlocked);
        assert_eq!(support.stats().releases, 1);
    }

    #[tokio::test]
    async fn test_stop_invalidates_states() {
        let group = InMemoryGroup::new(PartitionConfig::default());
        let partition = group.join(ClusterNode::new("solo")).await.unwrap();
        let handler = SharedLocalLockHandler::new();
        let support =
            ClusterLockSupport::new(ClusterLockConfig::default(), partition, handler.clone());
        support.start().unwrap();

        let id = LockId::from("x");
        let state = support.get_cluster_lock_state(&id, true).unwrap();
        assert!(support.try_lock(&id).await.unwrap().acquired);

        support.stop();

        assert!(!support.is_started());
        assert_eq!(state.lock().status(), LockStatus::Invalid);
        assert!(support.lock_ids().is_empty());
        assert!(handler.lock_holder(&id).is_none());
        assert!(support.unlock(&id).await.unwrap_err().is_illegal_state());
    }

    #[tokio::test]
    async fn test_outranks_follows_view_order() {
        let group = InMemoryGroup::new(PartitionConfig::default());
        let partition = group.join(ClusterNode::new("z")).await.unwrap();
        let _other = group.join(ClusterNode::new("a")).await.unwrap();
        let support = ClusterLockSupport::new(
            ClusterLockConfig::default(),
            partition,
            SharedLocalLockHandler::new(),
        );

        let z = ClusterNode::new("z");
        let a = ClusterNode::new("a");
        assert!(support.outranks(&z, &a));
        assert!(!support.outranks(&a, &z));
        // Unknown nodes lose to members, and fall back to name order among themselves
        assert!(support.outranks(&a, &ClusterNode::new("ghost")));
        assert!(support.outranks(&ClusterNode::new("b"), &ClusterNode::new("c")));
    }

    #[test]
    fn test_tally_counts_failures_and_abstentions() {
        let ok = Payload::encode(REMOTE_LOCK_METHOD, &RemoteLockResponse::ok(&ClusterNode::new("b")))
            .unwrap();
        let reject = Payload::encode(
            REMOTE_LOCK_METHOD,
            &RemoteLockResponse::reject(&ClusterNode::new("c"), Some(&ClusterNode::new("d"))),
        )
        .unwrap();
        let responses = vec![
            MemberResponse {
                node: ClusterNode::new("b"),
                reply: MemberReply::Ok(ok),
            },
            MemberResponse {
                node: ClusterNode::new("c"),
                reply: MemberReply::Ok(reject),
            },
            MemberResponse {
                node: ClusterNode::new("d"),
                reply: MemberReply::NoHandler,
            },
            MemberResponse {
                node: ClusterNode::new("e"),
                reply: MemberReply::Failed("timed out".to_string()),
            },
        ];

        let tally = Tally::collect(&responses);
        assert!(!tally.is_unanimous());
        assert_eq!(tally.holder, Some(ClusterNode::new("d")));
        assert_eq!(
            tally.rejected_by,
            vec![ClusterNode::new("c"), ClusterNode::new("e")]
        );
    }
}
