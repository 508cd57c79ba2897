//! Common test utilities for cluster lock integration tests
//!
//! - TestCluster: N lock supports joined to one in-process partition
//! - RecordingPartition: partition wrapper that records outbound calls and can
//!   fail them as a whole

#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use clasp_common::{ClaspError, ClusterNode, LockId};
use clasp_consistency::{
    ClusterLockConfig, ClusterLockSupport, ExclusiveLocalLockHandler, LocalLockHandler,
    LockPolicyKind, LockStatus, SharedLocalLockHandler,
};
use clasp_core::{
    InMemoryGroup, InMemoryPartition, MemberResponse, MembershipListener, Partition,
    PartitionConfig, Payload, RpcHandler,
};

pub const LOCK_TIMEOUT: Duration = Duration::from_millis(100);
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

/// Partition that records the methods it sends
pub struct RecordingPartition {
    inner: Arc<InMemoryPartition>,
    calls: Mutex<Vec<String>>,
    fail_calls: AtomicBool,
}

impl RecordingPartition {
    pub fn new(inner: Arc<InMemoryPartition>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: Mutex::new(Vec::new()),
            fail_calls: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Make every outbound call fail as a whole
    pub fn fail_calls(&self, fail: bool) {
        self.fail_calls.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Partition for RecordingPartition {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn local_node(&self) -> Option<ClusterNode> {
        self.inner.local_node()
    }

    fn current_view(&self) -> Vec<ClusterNode> {
        self.inner.current_view()
    }

    fn request_timeout(&self) -> Duration {
        self.inner.request_timeout()
    }

    async fn call_method_on_cluster(
        &self,
        service_name: &str,
        payload: Payload,
        exclude_self: bool,
    ) -> Result<Vec<MemberResponse>, ClaspError> {
        self.calls.lock().push(payload.method.clone());
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(ClaspError::InternalError("channel closed".to_string()));
        }
        self.inner
            .call_method_on_cluster(service_name, payload, exclude_self)
            .await
    }

    fn register_rpc_handler(&self, service_name: &str, handler: Arc<dyn RpcHandler>) {
        self.inner.register_rpc_handler(service_name, handler);
    }

    fn unregister_rpc_handler(&self, service_name: &str) {
        self.inner.unregister_rpc_handler(service_name);
    }

    fn register_membership_listener(&self, listener: Arc<dyn MembershipListener>) {
        self.inner.register_membership_listener(listener);
    }

    fn unregister_membership_listener(&self, listener: &Arc<dyn MembershipListener>) {
        self.inner.unregister_membership_listener(listener);
    }
}

pub enum TestHandler {
    Shared(Arc<SharedLocalLockHandler>),
    Exclusive(Arc<ExclusiveLocalLockHandler>),
}

pub struct TestNode {
    pub node: ClusterNode,
    pub partition: Arc<RecordingPartition>,
    pub support: Arc<ClusterLockSupport>,
    pub handler: TestHandler,
}

impl TestNode {
    pub fn shared(&self) -> &Arc<SharedLocalLockHandler> {
        match &self.handler {
            TestHandler::Shared(handler) => handler,
            TestHandler::Exclusive(_) => panic!("node {} uses the exclusive handler", self.node),
        }
    }

    pub fn exclusive(&self) -> &Arc<ExclusiveLocalLockHandler> {
        match &self.handler {
            TestHandler::Exclusive(handler) => handler,
            TestHandler::Shared(_) => panic!("node {} uses the shared handler", self.node),
        }
    }

    pub fn holder(&self, lock_id: &LockId) -> Option<ClusterNode> {
        self.support.holder(lock_id)
    }

    pub fn status(&self, lock_id: &LockId) -> LockStatus {
        self.support.status(lock_id)
    }
}

pub struct TestCluster {
    pub group: Arc<InMemoryGroup>,
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// Start `size` nodes named `node-0..` with the given policy
    pub async fn start(size: usize, policy: LockPolicyKind) -> Self {
        Self::start_with(size, policy, REQUEST_TIMEOUT).await
    }

    /// Start `size` nodes whose partition calls give up after `request_timeout`
    pub async fn start_with(size: usize, policy: LockPolicyKind, request_timeout: Duration) -> Self {
        let cluster = Self::joined_with(size, policy, request_timeout).await;
        for node in &cluster.nodes {
            node.support.start().unwrap();
        }
        cluster
    }

    /// Join `size` nodes without starting their lock supports
    pub async fn joined(size: usize, policy: LockPolicyKind) -> Self {
        Self::joined_with(size, policy, REQUEST_TIMEOUT).await
    }

    async fn joined_with(size: usize, policy: LockPolicyKind, request_timeout: Duration) -> Self {
        let group = InMemoryGroup::new(PartitionConfig {
            name: "LockTestPartition".to_string(),
            request_timeout,
        });

        let mut nodes = Vec::with_capacity(size);
        for i in 0..size {
            let node = ClusterNode::new(format!("node-{i}"));
            let partition = RecordingPartition::new(group.join(node.clone()).await.unwrap());
            let (handler, local): (TestHandler, Arc<dyn LocalLockHandler>) = match policy {
                LockPolicyKind::NonGloballyExclusive => {
                    let handler = SharedLocalLockHandler::new();
                    (TestHandler::Shared(handler.clone()), handler)
                }
                LockPolicyKind::GloballyExclusive => {
                    let handler = ExclusiveLocalLockHandler::new(node.clone());
                    (TestHandler::Exclusive(handler.clone()), handler)
                }
            };
            let config = ClusterLockConfig {
                policy,
                lock_timeout: LOCK_TIMEOUT,
                ..Default::default()
            };
            let support = ClusterLockSupport::new(config, partition.clone(), local);

            nodes.push(TestNode {
                node,
                partition,
                support,
                handler,
            });
        }

        Self { group, nodes }
    }

    pub fn node(&self, index: usize) -> &TestNode {
        &self.nodes[index]
    }

    /// Holders recorded by every node, in node order
    pub fn holders(&self, lock_id: &LockId) -> Vec<Option<ClusterNode>> {
        self.nodes.iter().map(|n| n.holder(lock_id)).collect()
    }

    pub fn clear_calls(&self) {
        for node in &self.nodes {
            node.partition.clear_calls();
        }
    }
}
