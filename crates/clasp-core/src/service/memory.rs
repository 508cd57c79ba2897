// In-process partition
// A group of members living in one process. Each sender reaches each member
// through its own FIFO lane, so calls from one node are handled by a member in
// the order they were made. Callers wait at most the configured request
// timeout for a reply. Members can be made unreachable to inject faults, and
// join/leave installs a new view and notifies listeners.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use clasp_common::{ClaspError, ClusterNode};

use super::{
    member_event::{MembershipChange, MembershipEventPublisher, MembershipListener},
    partition::{MemberReply, MemberResponse, Partition, PartitionConfig, Payload, RpcHandler},
};

const EVENT_QUEUE_SIZE: usize = 256;

/// A call queued on a member's inbound lane
struct Delivery {
    sender: ClusterNode,
    service_name: String,
    payload: Payload,
    reply: oneshot::Sender<MemberReply>,
}

struct MemberEndpoint {
    node: ClusterNode,
    handlers: DashMap<String, Arc<dyn RpcHandler>>,
    /// Inbound lanes keyed by sender
    lanes: DashMap<ClusterNode, mpsc::UnboundedSender<Delivery>>,
    events: MembershipEventPublisher,
    reachable: AtomicBool,
}

impl MemberEndpoint {
    fn new(node: ClusterNode) -> Self {
        Self {
            node,
            handlers: DashMap::new(),
            lanes: DashMap::new(),
            events: MembershipEventPublisher::new(EVENT_QUEUE_SIZE),
            reachable: AtomicBool::new(true),
        }
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::Acquire)
    }

    /// Queue a call behind every earlier call from the same sender
    fn deliver(self: &Arc<Self>, delivery: Delivery) {
        let lane = self
            .lanes
            .entry(delivery.sender.clone())
            .or_insert_with(|| self.open_lane())
            .clone();

        if let Err(mpsc::error::SendError(delivery)) = lane.send(delivery) {
            let reason = format!("member {} stopped receiving", self.node);
            let _ = delivery.reply.send(MemberReply::Failed(reason));
        }
    }

    fn open_lane(self: &Arc<Self>) -> mpsc::UnboundedSender<Delivery> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        let target: Weak<MemberEndpoint> = Arc::downgrade(self);

        tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let Some(target) = target.upgrade() else {
                    break;
                };
                let reply = target
                    .dispatch(&delivery.sender, &delivery.service_name, delivery.payload)
                    .await;
                // The caller may have timed out already
                let _ = delivery.reply.send(reply);
            }
        });
        tx
    }

    async fn dispatch(&self, sender: &ClusterNode, service_name: &str, payload: Payload) -> MemberReply {
        let handler = match self.handlers.get(service_name) {
            Some(handler) => handler.value().clone(),
            None => return MemberReply::NoHandler,
        };

        match handler.handle(sender, payload).await {
            Ok(reply) => MemberReply::Ok(reply),
            Err(e) => MemberReply::Failed(e.to_string()),
        }
    }
}

enum Pending {
    Ready(MemberReply),
    Waiting(oneshot::Receiver<MemberReply>),
}

/// Shared medium connecting the members of an in-process partition
pub struct InMemoryGroup {
    config: PartitionConfig,
    members: RwLock<Vec<Arc<MemberEndpoint>>>,
}

impl InMemoryGroup {
    pub fn new(config: PartitionConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            members: RwLock::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Current view, ordered by join time
    pub fn view(&self) -> Vec<ClusterNode> {
        self.members.read().iter().map(|m| m.node.clone()).collect()
    }

    fn endpoints(&self) -> Vec<Arc<MemberEndpoint>> {
        self.members.read().clone()
    }

    fn contains(&self, node: &ClusterNode) -> bool {
        self.members.read().iter().any(|m| &m.node == node)
    }

    /// Add `node` to the view and return its partition handle
    pub async fn join(self: &Arc<Self>, node: ClusterNode) -> Result<Arc<InMemoryPartition>, ClaspError> {
        let endpoint = Arc::new(MemberEndpoint::new(node.clone()));
        {
            let mut members = self.members.write();
            if members.iter().any(|m| m.node == node) {
                return Err(ClaspError::IllegalArgument(format!(
                    "node {} is already a member of partition {}",
                    node, self.config.name
                )));
            }
            members.push(endpoint.clone());
        }

        info!(node = %node, partition = %self.config.name, "Member joined partition");
        self.publish(MembershipChange::joined(vec![node], self.view()))
            .await;

        Ok(Arc::new(InMemoryPartition {
            group: self.clone(),
            endpoint,
        }))
    }

    /// Remove `node` from the view; remaining members see a departure
    pub async fn leave(&self, node: &ClusterNode) -> bool {
        let removed = {
            let mut members = self.members.write();
            let before = members.len();
            members.retain(|m| &m.node != node);
            members.len() != before
        };

        if removed {
            info!(node = %node, partition = %self.config.name, "Member left partition");
            self.publish(MembershipChange::departed(vec![node.clone()], self.view()))
                .await;
        }
        removed
    }

    /// Make a member unreachable (or reachable again) without changing the view
    pub fn set_reachable(&self, node: &ClusterNode, reachable: bool) {
        if let Some(endpoint) = self.members.read().iter().find(|m| &m.node == node) {
            endpoint.reachable.store(reachable, Ordering::Release);
            debug!(node = %node, reachable, "Member reachability changed");
        }
    }

    async fn publish(&self, change: MembershipChange) {
        for endpoint in self.endpoints() {
            endpoint.events.publish(change.clone()).await;
        }
    }
}

/// One member's handle on an [`InMemoryGroup`]
pub struct InMemoryPartition {
    group: Arc<InMemoryGroup>,
    endpoint: Arc<MemberEndpoint>,
}

impl InMemoryPartition {
    pub fn group(&self) -> &Arc<InMemoryGroup> {
        &self.group
    }

    fn is_member(&self) -> bool {
        self.group.contains(&self.endpoint.node)
    }
}

#[async_trait]
impl Partition for InMemoryPartition {
    fn name(&self) -> &str {
        &self.group.config.name
    }

    fn local_node(&self) -> Option<ClusterNode> {
        self.is_member().then(|| self.endpoint.node.clone())
    }

    fn current_view(&self) -> Vec<ClusterNode> {
        self.group.view()
    }

    fn request_timeout(&self) -> Duration {
        self.group.config.request_timeout
    }

    async fn call_method_on_cluster(
        &self,
        service_name: &str,
        payload: Payload,
        exclude_self: bool,
    ) -> Result<Vec<MemberResponse>, ClaspError> {
        if !self.is_member() {
            return Err(ClaspError::IllegalState(format!(
                "node {} is not a member of partition {}",
                self.endpoint.node, self.group.config.name
            )));
        }

        let sender = self.endpoint.node.clone();
        let sender_reachable = self.endpoint.is_reachable();
        let targets: Vec<Arc<MemberEndpoint>> = self
            .group
            .endpoints()
            .into_iter()
            .filter(|m| !(exclude_self && m.node == sender))
            .collect();

        debug!(
            service = %service_name,
            method = %payload.method,
            targets = targets.len(),
            "Calling method on cluster"
        );

        let mut pending = Vec::with_capacity(targets.len());
        for target in targets {
            if !sender_reachable || !target.is_reachable() {
                let reason = format!("member {} is unreachable", target.node);
                pending.push((target.node.clone(), Pending::Ready(MemberReply::Failed(reason))));
                continue;
            }

            let (reply, receiver) = oneshot::channel();
            target.deliver(Delivery {
                sender: sender.clone(),
                service_name: service_name.to_string(),
                payload: payload.clone(),
                reply,
            });
            pending.push((target.node.clone(), Pending::Waiting(receiver)));
        }

        let request_timeout = self.group.config.request_timeout;
        let responses = futures::future::join_all(pending.into_iter().map(|(node, pending)| async move {
            let reply = match pending {
                Pending::Ready(reply) => reply,
                Pending::Waiting(receiver) => match tokio::time::timeout(request_timeout, receiver).await {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(_)) => {
                        warn!(node = %node, "Cluster call dropped before a reply");
                        MemberReply::Failed(format!("call to {} was dropped", node))
                    }
                    Err(_) => MemberReply::Failed(format!(
                        "call to {} timed out after {:?}",
                        node, request_timeout
                    )),
                },
            };
            MemberResponse { node, reply }
        }))
        .await;

        Ok(responses)
    }

    fn register_rpc_handler(&self, service_name: &str, handler: Arc<dyn RpcHandler>) {
        self.endpoint
            .handlers
            .insert(service_name.to_string(), handler);
        debug!(node = %self.endpoint.node, service = %service_name, "Registered RPC handler");
    }

    fn unregister_rpc_handler(&self, service_name: &str) {
        self.endpoint.handlers.remove(service_name);
        debug!(node = %self.endpoint.node, service = %service_name, "Unregistered RPC handler");
    }

    fn register_membership_listener(&self, listener: Arc<dyn MembershipListener>) {
        self.endpoint.events.register_listener(listener);
    }

    fn unregister_membership_listener(&self, listener: &Arc<dyn MembershipListener>) {
        self.endpoint.events.unregister_listener(listener);
    }
}
