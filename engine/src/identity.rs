//! Unix identity allocation
//!
//! Every project deployed to a cluster tree gets one (uid, gid) pair,
//! allocated out of the root cluster's configured range. Concurrent
//! allocators can race for the same numbers; the store's uniqueness
//! guarantee turns the race into a conflict, and the allocator retries
//! with the next candidate pair. Reservations outlive their project so
//! numbers are never handed to a different owner.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::api::Clusters;
use crate::errors::EngineError;

/// A reserved (uid, gid) pair.
///
/// `project`/`cluster` are cleared on unlink; the numeric pair itself
/// stays reserved within its allocation domain forever.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnixId {
    pub uid: u32,
    pub gid: u32,
    pub project: Option<String>,
    pub cluster: Option<String>,
}

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,

    /// Another reservation already claims the uid, the gid, or the
    /// (project, cluster) pair
    Conflict,
}

/// Storage for identity reservations.
///
/// `domain` is the root cluster name: the allocation domain a
/// reservation belongs to, fixed at insert time. Unlinking clears the
/// project/cluster association but never removes the row from its
/// domain, so uniqueness checks and max queries keep seeing it.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Find the linked reservation for (project, domain).
    async fn find(&self, project: &str, domain: &str) -> Result<Option<UnixId>, EngineError>;

    /// Highest (uid, gid) reserved in the domain, linked or not.
    async fn max_ids(&self, domain: &str) -> Result<Option<(u32, u32)>, EngineError>;

    /// Insert if no uniqueness rule is violated.
    async fn try_insert(&self, domain: &str, id: &UnixId) -> Result<InsertOutcome, EngineError>;

    /// Detach the project/cluster association, keeping the reservation.
    async fn unlink(&self, project: &str, domain: &str) -> Result<(), EngineError>;

    /// Re-attach an unlinked reservation. Returns false when no
    /// matching unlinked pair exists in the domain.
    async fn relink(
        &self,
        project: &str,
        domain: &str,
        uid: u32,
        gid: u32,
    ) -> Result<bool, EngineError>;
}

/// Collision-safe allocator of per-project unix identities.
pub struct UnixIdentityAllocator {
    store: Arc<dyn IdentityStore>,
    clusters: Arc<dyn Clusters>,
}

impl UnixIdentityAllocator {
    pub fn new(store: Arc<dyn IdentityStore>, clusters: Arc<dyn Clusters>) -> Self {
        Self { store, clusters }
    }

    /// Get or create the identity for (project, cluster's root).
    ///
    /// Idempotent: an existing reservation is returned as-is. A fresh
    /// allocation starts at max+1 (or the range minimum) and walks past
    /// collisions until a pair sticks or the range runs out.
    pub async fn allocate(&self, project: &str, cluster: &str) -> Result<UnixId, EngineError> {
        let root = self.root(cluster).await?;

        if let Some(existing) = self.store.find(project, &root.name).await? {
            return Ok(existing);
        }

        // Stray reservations below the configured minimum (from a range
        // moved upward) must not drag the starting point under it.
        let (mut uid, mut gid) = match self.store.max_ids(&root.name).await? {
            Some((max_uid, max_gid)) => (
                (max_uid + 1).max(root.min_uid),
                (max_gid + 1).max(root.min_gid),
            ),
            None => (root.min_uid, root.min_gid),
        };

        loop {
            if !root.contains(uid, gid) {
                error!(
                    "uid/gid range exhausted for cluster {} (uid {}, gid {})",
                    root.name, uid, gid
                );
                return Err(EngineError::RangeExhausted(format!(
                    "cluster {} has no free uid/gid below ({}, {})",
                    root.name, root.max_uid, root.max_gid
                )));
            }

            let candidate = UnixId {
                uid,
                gid,
                project: Some(project.to_string()),
                cluster: Some(root.name.clone()),
            };
            match self.store.try_insert(&root.name, &candidate).await? {
                InsertOutcome::Inserted => {
                    debug!("Allocated uid {} gid {} for {}", uid, gid, project);
                    return Ok(candidate);
                }
                InsertOutcome::Conflict => {
                    // The racing writer may have claimed this very
                    // project; then its reservation is ours to reuse.
                    if let Some(existing) = self.store.find(project, &root.name).await? {
                        return Ok(existing);
                    }
                    debug!("uid {} gid {} taken, retrying with next pair", uid, gid);
                    uid += 1;
                    gid += 1;
                }
            }
        }
    }

    /// Detach the identity from a deleted project, retaining the
    /// numeric reservation.
    pub async fn unlink(&self, project: &str, cluster: &str) -> Result<(), EngineError> {
        let root = self.root(cluster).await?;
        self.store.unlink(project, &root.name).await
    }

    /// Re-attach a previously unlinked reservation to a project.
    pub async fn relink(
        &self,
        project: &str,
        cluster: &str,
        uid: u32,
        gid: u32,
    ) -> Result<bool, EngineError> {
        let root = self.root(cluster).await?;
        self.store.relink(project, &root.name, uid, gid).await
    }

    async fn root(&self, cluster: &str) -> Result<crate::models::Cluster, EngineError> {
        self.clusters
            .root(cluster)
            .await?
            .ok_or_else(|| EngineError::Precondition(format!("unknown cluster {}", cluster)))
    }
}

struct Reservation {
    domain: String,
    id: UnixId,
}

/// In-memory identity store with the relational uniqueness rules.
#[derive(Default)]
pub struct MemoryIdentityStore {
    rows: RwLock<Vec<Reservation>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn find(&self, project: &str, domain: &str) -> Result<Option<UnixId>, EngineError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|r| {
                r.domain == domain && r.id.project.as_deref() == Some(project)
            })
            .map(|r| r.id.clone()))
    }

    async fn max_ids(&self, domain: &str) -> Result<Option<(u32, u32)>, EngineError> {
        let rows = self.rows.read().await;
        let mut max: Option<(u32, u32)> = None;
        for r in rows.iter().filter(|r| r.domain == domain) {
            max = Some(match max {
                Some((u, g)) => (u.max(r.id.uid), g.max(r.id.gid)),
                None => (r.id.uid, r.id.gid),
            });
        }
        Ok(max)
    }

    async fn try_insert(&self, domain: &str, id: &UnixId) -> Result<InsertOutcome, EngineError> {
        let mut rows = self.rows.write().await;
        let conflict = rows.iter().any(|r| {
            r.domain == domain
                && (r.id.uid == id.uid
                    || r.id.gid == id.gid
                    || (r.id.project.is_some() && r.id.project == id.project))
        });
        if conflict {
            return Ok(InsertOutcome::Conflict);
        }
        rows.push(Reservation {
            domain: domain.to_string(),
            id: id.clone(),
        });
        Ok(InsertOutcome::Inserted)
    }

    async fn unlink(&self, project: &str, domain: &str) -> Result<(), EngineError> {
        let mut rows = self.rows.write().await;
        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.domain == domain && r.id.project.as_deref() == Some(project))
        {
            row.id.project = None;
            row.id.cluster = None;
            debug!("Unlinked uid {} gid {} in {}", row.id.uid, row.id.gid, domain);
        }
        Ok(())
    }

    async fn relink(
        &self,
        project: &str,
        domain: &str,
        uid: u32,
        gid: u32,
    ) -> Result<bool, EngineError> {
        let mut rows = self.rows.write().await;
        match rows.iter_mut().find(|r| {
            r.domain == domain && r.id.uid == uid && r.id.gid == gid && r.id.project.is_none()
        }) {
            Some(row) => {
                row.id.project = Some(project.to_string());
                row.id.cluster = Some(domain.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::memory::MemoryClusters;
    use crate::models::Cluster;

    fn clusters() -> Arc<MemoryClusters> {
        let root = Cluster {
            name: "prod".to_string(),
            parent: None,
            min_uid: 10_000,
            max_uid: 10_003,
            min_gid: 20_000,
            max_gid: 20_003,
        };
        let child = Cluster {
            name: "prod-eu".to_string(),
            parent: Some("prod".to_string()),
            min_uid: 0,
            max_uid: 0,
            min_gid: 0,
            max_gid: 0,
        };
        Arc::new(MemoryClusters::new([root, child]))
    }

    fn allocator() -> UnixIdentityAllocator {
        UnixIdentityAllocator::new(Arc::new(MemoryIdentityStore::new()), clusters())
    }

    #[tokio::test]
    async fn allocate_is_get_or_create() {
        let allocator = allocator();

        let first = allocator.allocate("app", "prod-eu").await.unwrap();
        assert_eq!(first.uid, 10_000);
        assert_eq!(first.gid, 20_000);
        assert_eq!(first.cluster.as_deref(), Some("prod"));

        let again = allocator.allocate("app", "prod-eu").await.unwrap();
        assert_eq!(again, first);

        let other = allocator.allocate("other", "prod").await.unwrap();
        assert_eq!(other.uid, 10_001);
    }

    #[tokio::test]
    async fn concurrent_allocations_get_distinct_ids() {
        let store = Arc::new(MemoryIdentityStore::new());
        let clusters = clusters();

        let mut handles = Vec::new();
        for i in 0..4 {
            let allocator =
                UnixIdentityAllocator::new(Arc::clone(&store) as _, Arc::clone(&clusters) as _);
            handles.push(tokio::spawn(async move {
                allocator.allocate(&format!("p{}", i), "prod").await
            }));
        }

        let mut uids = Vec::new();
        for handle in handles {
            let id = handle.await.unwrap().unwrap();
            assert!((10_000..=10_003).contains(&id.uid));
            assert!((20_000..=20_003).contains(&id.gid));
            uids.push(id.uid);
        }
        uids.sort_unstable();
        uids.dedup();
        assert_eq!(uids.len(), 4);
    }

    #[tokio::test]
    async fn reservations_below_the_range_do_not_drag_allocation_down() {
        let store = Arc::new(MemoryIdentityStore::new());
        let legacy = UnixId {
            uid: 5,
            gid: 5,
            project: Some("legacy".to_string()),
            cluster: Some("prod".to_string()),
        };
        assert_eq!(
            store.try_insert("prod", &legacy).await.unwrap(),
            InsertOutcome::Inserted
        );

        let allocator = UnixIdentityAllocator::new(store, clusters());
        let id = allocator.allocate("app", "prod").await.unwrap();
        assert_eq!(id.uid, 10_000);
        assert_eq!(id.gid, 20_000);
    }

    #[tokio::test]
    async fn range_exhaustion_is_fatal() {
        let allocator = allocator();
        for i in 0..4 {
            allocator.allocate(&format!("p{}", i), "prod").await.unwrap();
        }
        let err = allocator.allocate("p4", "prod").await.unwrap_err();
        assert!(matches!(err, EngineError::RangeExhausted(_)));
    }

    #[tokio::test]
    async fn unlink_retains_the_reservation() {
        let allocator = allocator();
        let id = allocator.allocate("app", "prod").await.unwrap();
        allocator.unlink("app", "prod").await.unwrap();

        let next = allocator.allocate("other", "prod").await.unwrap();
        assert_ne!(next.uid, id.uid);
        assert_ne!(next.gid, id.gid);
    }

    #[tokio::test]
    async fn relink_reclaims_an_unlinked_pair() {
        let allocator = allocator();
        let id = allocator.allocate("app", "prod").await.unwrap();
        allocator.unlink("app", "prod").await.unwrap();

        assert!(allocator.relink("reborn", "prod", id.uid, id.gid).await.unwrap());
        let found = allocator.allocate("reborn", "prod").await.unwrap();
        assert_eq!(found.uid, id.uid);

        // A linked pair cannot be stolen.
        assert!(!allocator.relink("thief", "prod", id.uid, id.gid).await.unwrap());
    }
}
