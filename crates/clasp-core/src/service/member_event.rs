// Membership change event handling
// Provides event-driven notifications when members join or leave the partition view

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use clasp_common::{ClusterNode, current_timestamp};

/// Type of membership change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberChangeType {
    /// One or more members joined the view
    MemberJoin,
    /// One or more members left the view (graceful leave or crash)
    MemberLeave,
}

impl std::fmt::Display for MemberChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemberChangeType::MemberJoin => write!(f, "MEMBER_JOIN"),
            MemberChangeType::MemberLeave => write!(f, "MEMBER_LEAVE"),
        }
    }
}

/// A new membership view together with the members that changed
#[derive(Clone, Debug)]
pub struct MembershipChange {
    pub change_type: MemberChangeType,
    /// Members affected by the change
    pub members: Vec<ClusterNode>,
    /// The view after the change, in view order
    pub view: Vec<ClusterNode>,
    pub timestamp: i64,
}

impl MembershipChange {
    pub fn joined(members: Vec<ClusterNode>, view: Vec<ClusterNode>) -> Self {
        Self {
            change_type: MemberChangeType::MemberJoin,
            members,
            view,
            timestamp: current_timestamp(),
        }
    }

    pub fn departed(members: Vec<ClusterNode>, view: Vec<ClusterNode>) -> Self {
        Self {
            change_type: MemberChangeType::MemberLeave,
            members,
            view,
            timestamp: current_timestamp(),
        }
    }

    /// Members that left the view, empty for joins
    pub fn departed_members(&self) -> &[ClusterNode] {
        match self.change_type {
            MemberChangeType::MemberLeave => &self.members,
            MemberChangeType::MemberJoin => &[],
        }
    }
}

/// Trait for handling membership change events
#[async_trait]
pub trait MembershipListener: Send + Sync {
    /// Called after the partition installed a new view
    async fn on_membership_change(&self, change: &MembershipChange);
}

/// Membership change publisher
/// Broadcasts view changes to subscribers and registered listeners
pub struct MembershipEventPublisher {
    broadcast_tx: broadcast::Sender<MembershipChange>,
    listeners: RwLock<Vec<Arc<dyn MembershipListener>>>,
}

impl MembershipEventPublisher {
    pub fn new(queue_size: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(queue_size);
        Self {
            broadcast_tx,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn register_listener(&self, listener: Arc<dyn MembershipListener>) {
        let mut listeners = self.listeners.write();
        listeners.push(listener);
        debug!("Registered membership listener, total: {}", listeners.len());
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn MembershipListener>) {
        let mut listeners = self.listeners.write();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Publish a change to subscribers, then run every listener in registration order
    pub async fn publish(&self, change: MembershipChange) {
        info!(
            "Publishing membership change {}: {:?}",
            change.change_type, change.members
        );

        let _ = self.broadcast_tx.send(change.clone());

        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_membership_change(&change).await;
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MembershipChange> {
        self.broadcast_tx.subscribe()
    }
}

/// A simple logging listener for debugging
pub struct LoggingMembershipListener;

#[async_trait]
impl MembershipListener for LoggingMembershipListener {
    async fn on_membership_change(&self, change: &MembershipChange) {
        match change.change_type {
            MemberChangeType::MemberJoin => {
                info!(
                    "[MemberEvent] Members joined: {:?} (view size: {})",
                    change.members,
                    change.view.len()
                );
            }
            MemberChangeType::MemberLeave => {
                info!(
                    "[MemberEvent] Members left: {:?} (view size: {})",
                    change.members,
                    change.view.len()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingListener {
        departures: AtomicUsize,
    }

    #[async_trait]
    impl MembershipListener for CountingListener {
        async fn on_membership_change(&self, change: &MembershipChange) {
            self.departures
                .fetch_add(change.departed_members().len(), Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_event_publisher() {
        let publisher = MembershipEventPublisher::new(16);
        let mut receiver = publisher.subscribe();

        let node = ClusterNode::new("node-1");
        publisher
            .publish(MembershipChange::joined(vec![node.clone()], vec![node]))
            .await;

        let received = receiver.try_recv().unwrap();
        assert_eq!(received.change_type, MemberChangeType::MemberJoin);
        assert!(received.departed_members().is_empty());
    }

    #[tokio::test]
    async fn test_listener_registration() {
        let publisher = MembershipEventPublisher::new(16);
        let counting = Arc::new(CountingListener {
            departures: AtomicUsize::new(0),
        });
        let listener: Arc<dyn MembershipListener> = counting.clone();

        publisher.register_listener(listener.clone());
        assert_eq!(publisher.listener_count(), 1);

        let gone = vec![ClusterNode::new("node-2"), ClusterNode::new("node-3")];
        publisher
            .publish(MembershipChange::departed(gone, vec![ClusterNode::new("node-1")]))
            .await;
        assert_eq!(counting.departures.load(Ordering::SeqCst), 2);

        publisher.unregister_listener(&listener);
        assert_eq!(publisher.listener_count(), 0);
    }

    #[test]
    fn test_change_type_display() {
        assert_eq!(MemberChangeType::MemberJoin.to_string(), "MEMBER_JOIN");
        assert_eq!(MemberChangeType::MemberLeave.to_string(), "MEMBER_LEAVE");
    }
}
