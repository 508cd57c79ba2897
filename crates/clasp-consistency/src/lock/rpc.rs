// Lock RPC surface
// Requests exchanged between lock supports through the partition and the
// handler that dispatches them on the receiving node

use std::sync::Weak;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use clasp_common::{ClaspError, ClusterNode, LockId};
use clasp_core::{Payload, RpcHandler};

use super::support::ClusterLockSupport;

pub const REMOTE_LOCK_METHOD: &str = "remoteLock";
pub const RELEASE_REMOTE_LOCK_METHOD: &str = "releaseRemoteLock";

/// `remoteLock(lockId, caller, attempt, timeoutMillis)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLockRequest {
    pub lock_id: LockId,
    pub caller: ClusterNode,
    /// Caller-local sequence number of the acquisition attempt
    pub attempt: u64,
    pub timeout_millis: u64,
}

/// `releaseRemoteLock(lockId, caller, attempt)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRemoteLockRequest {
    pub lock_id: LockId,
    pub caller: ClusterNode,
    /// Attempt whose grants are released
    pub attempt: u64,
}

/// Server side of the lock service, registered with the partition on start
pub struct LockRpcHandler {
    support: Weak<ClusterLockSupport>,
}

impl LockRpcHandler {
    pub fn new(support: Weak<ClusterLockSupport>) -> Self {
        Self { support }
    }
}

#[async_trait]
impl RpcHandler for LockRpcHandler {
    async fn handle(&self, sender: &ClusterNode, payload: Payload) -> Result<Payload, ClaspError> {
        let support = self
            .support
            .upgrade()
            .ok_or_else(|| ClaspError::not_started("cluster lock support"))?;

        match payload.method.as_str() {
            REMOTE_LOCK_METHOD => {
                let request: RemoteLockRequest = payload.decode()?;
                if &request.caller != sender {
                    warn!(sender = %sender, caller = %request.caller, "Lock request relayed for another node");
                }
                let response = support
                    .remote_lock(
                        &request.lock_id,
                        &request.caller,
                        request.attempt,
                        std::time::Duration::from_millis(request.timeout_millis),
                    )
                    .await?;
                Payload::encode(REMOTE_LOCK_METHOD, &response)
            }
            RELEASE_REMOTE_LOCK_METHOD => {
                let request: ReleaseRemoteLockRequest = payload.decode()?;
                support.release_remote_lock(&request.lock_id, &request.caller, request.attempt);
                Payload::encode(RELEASE_REMOTE_LOCK_METHOD, &())
            }
            other => Err(ClaspError::IllegalArgument(format!(
                "unknown lock method '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = RemoteLockRequest {
            lock_id: LockId::from("x"),
            caller: ClusterNode::new("a"),
            attempt: 7,
            timeout_millis: 250,
        };
        let payload = Payload::encode(REMOTE_LOCK_METHOD, &request).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&payload.body).unwrap();

        assert_eq!(json["lockId"], "x");
        assert_eq!(json["caller"], "a");
        assert_eq!(json["attempt"], 7);
        assert_eq!(json["timeoutMillis"], 250);
        assert_eq!(payload.decode::<RemoteLockRequest>().unwrap(), request);
    }

    #[tokio::test]
    async fn test_handler_without_support() {
        let handler = LockRpcHandler::new(Weak::new());
        let payload = Payload::encode(
            RELEASE_REMOTE_LOCK_METHOD,
            &ReleaseRemoteLockRequest {
                lock_id: LockId::from("x"),
                caller: ClusterNode::new("a"),
                attempt: 1,
            },
        )
        .unwrap();

        let result = handler.handle(&ClusterNode::new("a"), payload).await;
        assert!(matches!(result, Err(ClaspError::IllegalState(_))));
    }
}
