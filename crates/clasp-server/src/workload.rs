//! Contention workload
//!
//! Every node runs one worker that repeatedly picks a lock category at random
//! and tries to lock it cluster-wide. Under the non-globally-exclusive policy a
//! second worker per node takes local locks on the same categories. Workers
//! track who is inside each category and count any overlap as a violation.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use clasp_common::{ClaspError, ClusterNode, LockId};
use clasp_consistency::{
    ClusterLockConfig, ClusterLockSupport, ExclusiveLocalLockHandler, LocalLockHandler,
    LockPolicyKind, LockStats, SharedLocalLockHandler,
};
use clasp_core::{InMemoryGroup, PartitionConfig};

use crate::metrics;

/// Workload parameters
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Prefix of the generated node names
    pub node_prefix: String,
    pub nodes: usize,
    pub rounds: usize,
    /// Number of distinct lock categories
    pub locks: usize,
    /// How long a worker stays inside a category
    pub hold: Duration,
    pub lock: ClusterLockConfig,
    pub partition: PartitionConfig,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            node_prefix: "node".to_string(),
            nodes: 3,
            rounds: 100,
            locks: 4,
            hold: Duration::from_millis(2),
            lock: ClusterLockConfig::default(),
            partition: PartitionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    pub node: ClusterNode,
    pub stats: LockStats,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadReport {
    pub policy: String,
    pub nodes: usize,
    pub attempts: usize,
    pub acquired: usize,
    pub local_locks: usize,
    pub release_failures: usize,
    pub violations: usize,
    pub elapsed_ms: u128,
    pub node_stats: Vec<NodeReport>,
}

enum NodeHandler {
    Shared(Arc<SharedLocalLockHandler>),
    Exclusive(Arc<ExclusiveLocalLockHandler>),
}

struct WorkloadNode {
    support: Arc<ClusterLockSupport>,
    handler: NodeHandler,
}

/// Who is inside a category right now
#[derive(Default)]
struct Occupancy {
    cluster: AtomicUsize,
    local: AtomicUsize,
}

#[derive(Default)]
struct Counters {
    attempts: AtomicUsize,
    acquired: AtomicUsize,
    local_locks: AtomicUsize,
    release_failures: AtomicUsize,
    violations: AtomicUsize,
}

impl Counters {
    fn violation(&self, kind: &'static str, lock_id: &LockId) {
        warn!(lock_id = %lock_id, kind, "Mutual exclusion violated");
        metrics::record_violation(kind);
        self.violations.fetch_add(1, Ordering::SeqCst);
    }
}

struct Shared {
    config: WorkloadConfig,
    lock_ids: Vec<LockId>,
    occupancy: Vec<Occupancy>,
    counters: Counters,
}

impl Shared {
    fn pick(&self) -> usize {
        rand::rng().random_range(0..self.lock_ids.len())
    }
}

/// Run the workload on a fresh in-process cluster
pub async fn run(config: WorkloadConfig) -> Result<WorkloadReport, ClaspError> {
    if config.nodes == 0 || config.locks == 0 {
        return Err(ClaspError::IllegalArgument(
            "workload needs at least one node and one lock".to_string(),
        ));
    }

    let started = Instant::now();
    let group = InMemoryGroup::new(config.partition.clone());
    let mut nodes = Vec::with_capacity(config.nodes);
    for i in 0..config.nodes {
        let node = ClusterNode::parse(&format!("{}-{}", config.node_prefix, i))?;
        let partition = group.join(node.clone()).await?;
        let (handler, local): (NodeHandler, Arc<dyn LocalLockHandler>) = match config.lock.policy {
            LockPolicyKind::NonGloballyExclusive => {
                let handler = SharedLocalLockHandler::new();
                (NodeHandler::Shared(handler.clone()), handler)
            }
            LockPolicyKind::GloballyExclusive => {
                let handler = ExclusiveLocalLockHandler::new(node.clone());
                (NodeHandler::Exclusive(handler.clone()), handler)
            }
        };
        let support = ClusterLockSupport::new(config.lock.clone(), partition, local);
        support.start()?;
        nodes.push(Arc::new(WorkloadNode { support, handler }));
    }

    info!(
        nodes = config.nodes,
        rounds = config.rounds,
        locks = config.locks,
        policy = %config.lock.policy,
        "Starting lock workload"
    );

    let shared = Arc::new(Shared {
        lock_ids: (0..config.locks)
            .map(|i| LockId::new(format!("category-{i}")))
            .collect(),
        occupancy: (0..config.locks).map(|_| Occupancy::default()).collect(),
        counters: Counters::default(),
        config,
    });

    let mut tasks = Vec::new();
    for node in &nodes {
        tasks.push(tokio::spawn(cluster_worker(node.clone(), shared.clone())));
        if let NodeHandler::Shared(handler) = &node.handler {
            tasks.push(tokio::spawn(local_worker(handler.clone(), shared.clone())));
        }
    }
    for result in futures::future::join_all(tasks).await {
        result.map_err(|e| ClaspError::InternalError(format!("workload task failed: {e}")))??;
    }

    let node_stats = nodes
        .iter()
        .filter_map(|node| {
            let report = node.support.local_node().map(|node_id| NodeReport {
                node: node_id,
                stats: node.support.stats(),
            });
            node.support.stop();
            report
        })
        .collect();

    let counters = &shared.counters;
    let report = WorkloadReport {
        policy: shared.config.lock.policy.to_string(),
        nodes: shared.config.nodes,
        attempts: counters.attempts.load(Ordering::SeqCst),
        acquired: counters.acquired.load(Ordering::SeqCst),
        local_locks: counters.local_locks.load(Ordering::SeqCst),
        release_failures: counters.release_failures.load(Ordering::SeqCst),
        violations: counters.violations.load(Ordering::SeqCst),
        elapsed_ms: started.elapsed().as_millis(),
        node_stats,
    };
    info!(
        attempts = report.attempts,
        acquired = report.acquired,
        violations = report.violations,
        elapsed_ms = u64::try_from(report.elapsed_ms).unwrap_or(u64::MAX),
        "Lock workload finished"
    );
    Ok(report)
}

async fn cluster_worker(node: Arc<WorkloadNode>, shared: Arc<Shared>) -> Result<(), ClaspError> {
    let policy = shared.config.lock.policy;
    let counters = &shared.counters;

    for _ in 0..shared.config.rounds {
        let index = shared.pick();
        let lock_id = &shared.lock_ids[index];
        let occupancy = &shared.occupancy[index];

        let attempt = Instant::now();
        let result = node.support.try_lock(lock_id).await?;
        counters.attempts.fetch_add(1, Ordering::SeqCst);
        metrics::record_lock_attempt(policy.as_str(), result.acquired, attempt.elapsed().as_secs_f64());
        if !result.acquired {
            debug!(lock_id = %lock_id, holder = ?result.current_holder, "Lock attempt rejected");
            tokio::task::yield_now().await;
            continue;
        }
        counters.acquired.fetch_add(1, Ordering::SeqCst);

        match &node.handler {
            NodeHandler::Shared(_) => {
                if occupancy.cluster.fetch_add(1, Ordering::SeqCst) > 0 {
                    counters.violation("cluster-cluster", lock_id);
                }
                if occupancy.local.load(Ordering::SeqCst) > 0 {
                    counters.violation("cluster-local", lock_id);
                }
                tokio::time::sleep(shared.config.hold).await;
                occupancy.cluster.fetch_sub(1, Ordering::SeqCst);
            }
            NodeHandler::Exclusive(handler) => {
                // The lock may already have been yielded to another node
                if let Ok(guard) = handler.enter(lock_id) {
                    if occupancy.cluster.fetch_add(1, Ordering::SeqCst) > 0 {
                        counters.violation("cluster-cluster", lock_id);
                    }
                    tokio::time::sleep(shared.config.hold).await;
                    occupancy.cluster.fetch_sub(1, Ordering::SeqCst);
                    drop(guard);
                }
            }
        }

        // Yielding holders keep the lock until asked, unless they choose to let go
        let release = match policy {
            LockPolicyKind::NonGloballyExclusive => true,
            LockPolicyKind::GloballyExclusive => rand::rng().random_bool(0.5),
        };
        if release && let Err(e) = node.support.unlock(lock_id).await {
            warn!(lock_id = %lock_id, error = %e, "Unlock failed");
            counters.release_failures.fetch_add(1, Ordering::SeqCst);
        }
    }
    Ok(())
}

async fn local_worker(handler: Arc<SharedLocalLockHandler>, shared: Arc<Shared>) -> Result<(), ClaspError> {
    let counters = &shared.counters;

    for _ in 0..shared.config.rounds {
        let index = shared.pick();
        let lock_id = &shared.lock_ids[index];
        let occupancy = &shared.occupancy[index];

        if let Ok(guard) = handler.try_lock_locally(lock_id) {
            counters.local_locks.fetch_add(1, Ordering::SeqCst);
            occupancy.local.fetch_add(1, Ordering::SeqCst);
            if occupancy.cluster.load(Ordering::SeqCst) > 0 {
                counters.violation("local-cluster", lock_id);
            }
            tokio::time::sleep(shared.config.hold).await;
            occupancy.local.fetch_sub(1, Ordering::SeqCst);
            drop(guard);
        }
        tokio::task::yield_now().await;
    }
    Ok(())
}
