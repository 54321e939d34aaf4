//! Per-job mutual exclusion.
//!
//! Every execution is guarded by the lock handler selected for the job's
//! configured [`LockType`]: in-process exclusion keyed by job name, or
//! cluster-wide exclusion delegated to an external coordination service
//! through the narrow [`CoordinationClient`] seam.
//!
//! `try_acquire` never blocks. Contention resolves to a skipped occurrence,
//! not queued waiting, so frequently-firing schedules cannot build an
//! unbounded backlog behind a slow run.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::Result;

/// Which lock handler guards a job, selected per job in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockType {
    /// In-process mutual exclusion.
    #[default]
    Local,
    /// Cluster-wide mutual exclusion via the coordination service.
    Clustered,
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Clustered => write!(f, "clustered"),
        }
    }
}

/// Mutual-exclusion capability for named jobs.
///
/// Implementations must be safe under concurrent `try_acquire` calls for the
/// same name: exactly one caller succeeds per acquisition epoch.
#[async_trait]
pub trait LockHandler: Send + Sync {
    /// Attempt to take the lock for `job_name` without blocking. Returns
    /// `false` if another execution holds it.
    async fn try_acquire(&self, job_name: &str) -> Result<bool>;

    /// Release the lock for `job_name`.
    async fn release(&self, job_name: &str) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Local lock handler
// ═══════════════════════════════════════════════════════════════════════════════

/// Process-wide lock handler: a shared set of held job names.
#[derive(Debug, Default)]
pub struct LocalLockHandler {
    held: DashSet<String>,
}

impl LocalLockHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockHandler for LocalLockHandler {
    async fn try_acquire(&self, job_name: &str) -> Result<bool> {
        // DashSet::insert returns false when the name was already present.
        Ok(self.held.insert(job_name.to_string()))
    }

    async fn release(&self, job_name: &str) -> Result<()> {
        self.held.remove(job_name);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Coordination service seam
// ═══════════════════════════════════════════════════════════════════════════════

/// Boundary contract for the external coordination service backing the
/// clustered lock.
///
/// The node created by `create_ephemeral` must be bound to this client's
/// session: if the owning process crashes or its session expires, the service
/// is required to remove the node on its own. That liveness guarantee is what
/// keeps a crashed scheduler from starving a clustered job forever; it is
/// placed on the service, not reimplemented here.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Create-if-absent of a session-scoped node. Returns `true` when this
    /// call created the node, `false` when it already existed.
    async fn create_ephemeral(&self, path: &str) -> Result<bool>;

    /// Delete a node previously created by this session.
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Cluster-wide lock handler delegating to a [`CoordinationClient`].
pub struct ClusteredLockHandler {
    client: Arc<dyn CoordinationClient>,
}

impl ClusteredLockHandler {
    pub fn new(client: Arc<dyn CoordinationClient>) -> Self {
        Self { client }
    }

    fn lock_path(job_name: &str) -> String {
        format!("/jobrig/locks/{}", job_name)
    }
}

#[async_trait]
impl LockHandler for ClusteredLockHandler {
    async fn try_acquire(&self, job_name: &str) -> Result<bool> {
        self.client
            .create_ephemeral(&Self::lock_path(job_name))
            .await
    }

    async fn release(&self, job_name: &str) -> Result<()> {
        self.client.delete(&Self::lock_path(job_name)).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory coordination backend
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory coordination service for single-node setups and tests.
///
/// Each connected session owns the nodes it creates; `expire_session` on a
/// session removes them all, simulating the crash-reclaim behavior a real
/// coordination service provides.
#[derive(Debug, Default)]
pub struct InMemoryCoordination {
    nodes: Arc<DashMap<String, u64>>,
    next_session: AtomicU64,
}

impl InMemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session against this service.
    pub fn connect(self: &Arc<Self>) -> InMemoryCoordinationSession {
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        InMemoryCoordinationSession {
            service: Arc::clone(self),
            session_id,
            expired: AtomicBool::new(false),
        }
    }

    fn remove_session_nodes(&self, session_id: u64) {
        self.nodes.retain(|_, owner| *owner != session_id);
    }
}

/// One session against the in-memory coordination service.
#[derive(Debug)]
pub struct InMemoryCoordinationSession {
    service: Arc<InMemoryCoordination>,
    session_id: u64,
    expired: AtomicBool,
}

impl InMemoryCoordinationSession {
    /// Simulate session loss: every node this session owns disappears.
    pub fn expire_session(&self) {
        self.expired.store(true, Ordering::SeqCst);
        self.service.remove_session_nodes(self.session_id);
    }
}

#[async_trait]
impl CoordinationClient for InMemoryCoordinationSession {
    async fn create_ephemeral(&self, path: &str) -> Result<bool> {
        if self.expired.load(Ordering::SeqCst) {
            return Err(crate::error::JobRigError::Coordination(
                "session expired".to_string(),
            ));
        }

        // Entry-based insert keeps create-if-absent atomic under concurrency.
        let mut created = false;
        self.service
            .nodes
            .entry(path.to_string())
            .or_insert_with(|| {
                created = true;
                self.session_id
            });
        Ok(created)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.service
            .nodes
            .remove_if(path, |_, owner| *owner == self.session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_acquire_release() {
        let handler = LocalLockHandler::new();
        assert!(handler.try_acquire("sync").await.unwrap());
        assert!(!handler.try_acquire("sync").await.unwrap());

        // Different name is independent.
        assert!(handler.try_acquire("cleanup").await.unwrap());

        handler.release("sync").await.unwrap();
        assert!(handler.try_acquire("sync").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_single_winner_under_contention() {
        let handler = Arc::new(LocalLockHandler::new());

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let handler = Arc::clone(&handler);
            tasks.push(tokio::spawn(async move {
                handler.try_acquire("sync").await.unwrap()
            }));
        }

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_clustered_exclusion_across_sessions() {
        let service = Arc::new(InMemoryCoordination::new());
        let node_a = ClusteredLockHandler::new(Arc::new(service.connect()));
        let node_b = ClusteredLockHandler::new(Arc::new(service.connect()));

        assert!(node_a.try_acquire("sync").await.unwrap());
        assert!(!node_b.try_acquire("sync").await.unwrap());

        node_a.release("sync").await.unwrap();
        assert!(node_b.try_acquire("sync").await.unwrap());
    }

    #[tokio::test]
    async fn test_release_is_scoped_to_owning_session() {
        let service = Arc::new(InMemoryCoordination::new());
        let session_a = Arc::new(service.connect());
        let session_b = Arc::new(service.connect());
        let node_a = ClusteredLockHandler::new(session_a);
        let node_b = ClusteredLockHandler::new(session_b);

        assert!(node_a.try_acquire("sync").await.unwrap());
        // A release from a non-owner must not free the lock.
        node_b.release("sync").await.unwrap();
        assert!(!node_b.try_acquire("sync").await.unwrap());
    }

    #[tokio::test]
    async fn test_session_expiry_reclaims_lock() {
        let service = Arc::new(InMemoryCoordination::new());
        let crashed_session = Arc::new(service.connect());
        let crashed = ClusteredLockHandler::new(crashed_session.clone());
        let survivor = ClusteredLockHandler::new(Arc::new(service.connect()));

        assert!(crashed.try_acquire("sync").await.unwrap());
        assert!(!survivor.try_acquire("sync").await.unwrap());

        // The owning process dies without releasing.
        crashed_session.expire_session();
        assert!(survivor.try_acquire("sync").await.unwrap());
    }
}
