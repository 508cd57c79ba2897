//! Clasp Common - Shared types, errors, and utilities
//!
//! This crate provides the foundational types used across all Clasp components:
//! - Error types
//! - Cluster node and lock category identity
//! - Utility functions

pub mod error;
pub mod node;
pub mod utils;

// Re-exports for convenience
pub use error::{ClaspError, Result};
pub use node::{ClusterNode, LockId};
pub use utils::{current_timestamp, is_valid, local_ip};

/// Default service name the cluster lock support registers with the partition
pub const DEFAULT_LOCK_SERVICE_NAME: &str = "ClusterLockSupport";

/// Default partition name
pub const DEFAULT_PARTITION_NAME: &str = "DefaultPartition";
