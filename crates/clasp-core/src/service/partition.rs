// Partition abstraction
// Group-communication surface used by clustered services: RPC fan-out to every
// member of the current view plus membership notifications

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use clasp_common::{ClaspError, ClusterNode};

use crate::model::Configuration;

use super::member_event::MembershipListener;

/// Configuration for partition RPC calls
#[derive(Clone, Debug)]
pub struct PartitionConfig {
    /// Partition (group) name
    pub name: String,
    /// Time allowed for a single member to answer a call
    pub request_timeout: Duration,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            name: clasp_common::DEFAULT_PARTITION_NAME.to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl PartitionConfig {
    /// Create a PartitionConfig from application Configuration
    pub fn from_configuration(config: &Configuration) -> Result<Self, ClaspError> {
        Ok(Self {
            name: config.partition_name(),
            request_timeout: Duration::from_millis(config.partition_request_timeout_ms()?),
        })
    }
}

/// An encoded remote method invocation or its result
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    pub method: String,
    pub body: Vec<u8>,
}

impl Payload {
    pub fn encode<T: Serialize>(method: &str, body: &T) -> Result<Self, ClaspError> {
        Ok(Self {
            method: method.to_string(),
            body: serde_json::to_vec(body)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ClaspError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// Outcome of a call on one member
#[derive(Clone, Debug)]
pub enum MemberReply {
    /// The member's service answered
    Ok(Payload),
    /// The member has no handler registered for the service
    NoHandler,
    /// The call failed or timed out
    Failed(String),
}

/// A member's reply to a cluster-wide call
#[derive(Clone, Debug)]
pub struct MemberResponse {
    pub node: ClusterNode,
    pub reply: MemberReply,
}

impl MemberResponse {
    pub fn is_failed(&self) -> bool {
        matches!(self.reply, MemberReply::Failed(_))
    }
}

/// Server side of a service registered with the partition
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Handle a call delivered by the partition on behalf of `sender`
    async fn handle(&self, sender: &ClusterNode, payload: Payload) -> Result<Payload, ClaspError>;
}

/// Reliable group communication between cluster members
#[async_trait]
pub trait Partition: Send + Sync {
    /// Name of the partition (group)
    fn name(&self) -> &str;

    /// Identity of this member, absent until the member has joined
    fn local_node(&self) -> Option<ClusterNode>;

    /// Current membership view, in view order
    fn current_view(&self) -> Vec<ClusterNode>;

    /// Longest time a caller waits for one member's reply
    fn request_timeout(&self) -> Duration;

    /// Invoke `payload` on every member of the view that registered `service_name`.
    ///
    /// Calls made by one member are handled by each target in the order they
    /// were made. Returns one response per targeted member in view order. Only failures of
    /// the call as a whole are returned as `Err`.
    async fn call_method_on_cluster(
        &self,
        service_name: &str,
        payload: Payload,
        exclude_self: bool,
    ) -> Result<Vec<MemberResponse>, ClaspError>;

    fn register_rpc_handler(&self, service_name: &str, handler: Arc<dyn RpcHandler>);

    fn unregister_rpc_handler(&self, service_name: &str);

    fn register_membership_listener(&self, listener: Arc<dyn MembershipListener>);

    fn unregister_membership_listener(&self, listener: &Arc<dyn MembershipListener>);
}
