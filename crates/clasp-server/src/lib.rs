//! Clasp Server - Workload runner for cluster locks
//!
//! Starts an in-process cluster of lock supports and drives a contention
//! workload against it, checking that locks stay exclusive.

pub mod metrics;
pub mod startup;
pub mod workload;
