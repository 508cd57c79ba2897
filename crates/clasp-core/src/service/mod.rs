// Core services for partition membership and group communication

pub mod member_event;
pub mod memory;
pub mod partition;

// Re-export commonly used types
pub use member_event::{
    LoggingMembershipListener, MemberChangeType, MembershipChange, MembershipEventPublisher,
    MembershipListener,
};
pub use memory::{InMemoryGroup, InMemoryPartition};
pub use partition::{
    MemberReply, MemberResponse, Partition, PartitionConfig, Payload, RpcHandler,
};
