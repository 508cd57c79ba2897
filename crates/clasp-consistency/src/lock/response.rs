//! Remote lock responses and acquisition results

use serde::{Deserialize, Serialize};

use clasp_common::{ClusterNode, LockId};

/// Verdict of a member on a remote lock request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockResponseFlag {
    /// The caller may become holder
    Ok,
    /// The lock is held or claimed by someone else
    Reject,
    /// The responder is competing for the lock and outranks the caller
    Fail,
}

impl LockResponseFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockResponseFlag::Ok => "ok",
            LockResponseFlag::Reject => "reject",
            LockResponseFlag::Fail => "fail",
        }
    }
}

/// A responding node's answer to `remoteLock`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteLockResponse {
    pub responder: ClusterNode,
    pub flag: LockResponseFlag,
    /// Conflicting holder (or competitor) known to the responder
    #[serde(default)]
    pub holder: Option<ClusterNode>,
}

impl RemoteLockResponse {
    pub fn ok(responder: &ClusterNode) -> Self {
        Self {
            responder: responder.clone(),
            flag: LockResponseFlag::Ok,
            holder: None,
        }
    }

    pub fn reject(responder: &ClusterNode, holder: Option<&ClusterNode>) -> Self {
        Self {
            responder: responder.clone(),
            flag: LockResponseFlag::Reject,
            holder: holder.cloned(),
        }
    }

    pub fn fail(responder: &ClusterNode, competitor: &ClusterNode) -> Self {
        Self {
            responder: responder.clone(),
            flag: LockResponseFlag::Fail,
            holder: Some(competitor.clone()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.flag == LockResponseFlag::Ok
    }
}

/// Result of a cluster-wide acquisition attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockAcquireResult {
    pub lock_id: Option<LockId>,
    /// Whether this node is now the recorded holder
    pub acquired: bool,
    /// Holder or competitor reported by a rejecting member, if any
    pub current_holder: Option<ClusterNode>,
    /// Members that did not answer OK
    pub rejected_by: Vec<ClusterNode>,
}

impl LockAcquireResult {
    pub fn acquired(lock_id: &LockId) -> Self {
        Self {
            lock_id: Some(lock_id.clone()),
            acquired: true,
            ..Default::default()
        }
    }

    pub fn rejected(
        lock_id: &LockId,
        current_holder: Option<ClusterNode>,
        rejected_by: Vec<ClusterNode>,
    ) -> Self {
        Self {
            lock_id: Some(lock_id.clone()),
            acquired: false,
            current_holder,
            rejected_by,
        }
    }
}
