//! Clasp Core - Configuration and group communication
//!
//! This crate provides:
//! - Typed configuration over the `config` crate
//! - The `Partition` abstraction (RPC fan-out and membership views)
//! - An in-process partition implementation
//! - Membership change events

pub mod model;
pub mod service;

// Re-export commonly used types
pub use model::Configuration;
pub use service::{
    InMemoryGroup, InMemoryPartition, MemberReply, MemberResponse, MembershipChange,
    MembershipListener, Partition, PartitionConfig, Payload, RpcHandler,
};
