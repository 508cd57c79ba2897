//! Error types for Clasp
//!
//! `ClaspError` is the single error enum shared by the partition layer and the
//! cluster lock support. Rejections during lock acquisition are not errors;
//! they are reported through the acquisition result instead.

use crate::node::{ClusterNode, LockId};

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum ClaspError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("remote call '{method}' failed: {reason}")]
    RemoteCall { method: String, reason: String },

    #[error("no handler registered for service '{0}'")]
    NoHandler(String),

    #[error("lock '{lock_id}' is held{}", .holder.as_ref().map(|h| format!(" by {h}")).unwrap_or_default())]
    LockHeld {
        lock_id: LockId,
        holder: Option<ClusterNode>,
    },

    #[error("timed out after {0} ms")]
    Timeout(u64),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl ClaspError {
    /// Build an illegal-state error for a service that has not been started
    pub fn not_started(service: &str) -> Self {
        ClaspError::IllegalState(format!("service '{}' has not been started", service))
    }

    pub fn remote_call(method: &str, reason: impl Into<String>) -> Self {
        ClaspError::RemoteCall {
            method: method.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self, ClaspError::IllegalState(_))
    }
}

pub type Result<T, E = ClaspError> = std::result::Result<T, E>;
