//! Clasp Consistency - Cluster-wide locks
//!
//! This crate provides:
//! - Per-node lock state for each lock category
//! - The acquire/release protocol over a `Partition`
//! - Lock policies (non-globally-exclusive, globally exclusive with yielding)
//! - Local lock handlers for both policies

pub mod lock;

pub use lock::{
    ClusterLockConfig, ClusterLockPolicy, ClusterLockSupport, ExclusiveLocalLockHandler,
    LocalLockHandler, LockAcquireResult, LockPolicyKind, LockStats, LockStatus,
    RemoteLockResponse, SharedLocalLockHandler,
};
