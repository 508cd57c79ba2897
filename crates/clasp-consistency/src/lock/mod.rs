// Cluster-wide lock support
// Two-phase category locks negotiated between partition members by RPC

pub mod local;
pub mod model;
pub mod policy;
pub mod response;
pub mod rpc;
pub mod stats;
pub mod support;

pub use local::{
    ExclusiveLocalLockHandler, ExclusiveUseGuard, LocalLockGuard, LocalLockHandler,
    SharedLocalLockHandler,
};
pub use model::{ClusterLockState, ClusterLockStore, LockStatus, SharedLockState};
pub use policy::{
    ClusterLockPolicy, GloballyExclusivePolicy, LockPolicyKind, NonGloballyExclusivePolicy,
    PolicyContext,
};
pub use response::{LockAcquireResult, LockResponseFlag, RemoteLockResponse};
pub use rpc::{
    LockRpcHandler, RELEASE_REMOTE_LOCK_METHOD, REMOTE_LOCK_METHOD, ReleaseRemoteLockRequest,
    RemoteLockRequest,
};
pub use stats::LockStats;
pub use support::{ClusterLockConfig, ClusterLockSupport};
