use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::store::{ClaimRecord, CoordStore, LeaseRecord, StoreError};

/// In-process coordination store: single-node deployments and tests. CAS
/// semantics match the Kubernetes backend (numeric resource versions,
/// conflict on stale writes).
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    peers: Vec<String>,
    claims: BTreeMap<String, ClaimRecord>,
    leases: BTreeMap<String, LeaseRecord>,
    next_version: u64,
}

impl Inner {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the set of Running replica identities.
    pub fn set_peers(&self, peers: Vec<String>) {
        self.lock().peers = peers;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store mutex poisoned")
    }
}

#[async_trait]
impl CoordStore for MemoryStore {
    async fn list_peers(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().peers.clone())
    }

    async fn list_claims(&self, assigned_to: Option<&str>) -> Result<Vec<ClaimRecord>, StoreError> {
        Ok(self
            .lock()
            .claims
            .values()
            .filter(|claim| match assigned_to {
                Some(identity) => claim.assigned_to() == Some(identity),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn create_claim(&self, claim: &ClaimRecord) -> Result<ClaimRecord, StoreError> {
        let mut inner = self.lock();
        if inner.claims.contains_key(&claim.id) {
            return Err(StoreError::AlreadyExists);
        }
        let mut stored = claim.clone();
        stored.resource_version = inner.bump();
        inner.claims.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn update_claim(&self, claim: &ClaimRecord) -> Result<ClaimRecord, StoreError> {
        let mut inner = self.lock();
        let version = inner.bump();
        let current = inner.claims.get_mut(&claim.id).ok_or(StoreError::NotFound)?;
        if current.resource_version != claim.resource_version {
            return Err(StoreError::Conflict);
        }
        let mut stored = claim.clone();
        stored.resource_version = version;
        *current = stored.clone();
        Ok(stored)
    }

    async fn delete_claim(&self, id: &str) -> Result<(), StoreError> {
        self.lock()
            .claims
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn get_lease(&self, name: &str) -> Result<Option<LeaseRecord>, StoreError> {
        Ok(self.lock().leases.get(name).cloned())
    }

    async fn create_lease(&self, lease: &LeaseRecord) -> Result<LeaseRecord, StoreError> {
        let mut inner = self.lock();
        if inner.leases.contains_key(&lease.name) {
            return Err(StoreError::AlreadyExists);
        }
        let mut stored = lease.clone();
        stored.resource_version = inner.bump();
        inner.leases.insert(stored.name.clone(), stored.clone());
        Ok(stored)
    }

    async fn update_lease(&self, lease: &LeaseRecord) -> Result<LeaseRecord, StoreError> {
        let mut inner = self.lock();
        let version = inner.bump();
        let current = inner.leases.get_mut(&lease.name).ok_or(StoreError::NotFound)?;
        if current.resource_version != lease.resource_version {
            return Err(StoreError::Conflict);
        }
        let mut stored = lease.clone();
        stored.resource_version = version;
        *current = stored.clone();
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::store::{ClaimRecord, CoordStore, StoreError};

    #[tokio::test]
    async fn stale_updates_conflict() {
        let store = MemoryStore::new();
        let claim = ClaimRecord::new("task-a-0-0".to_string(), "a", "{}".to_string());
        let stored = store.create_claim(&claim).await.unwrap();

        // First writer wins; the second still holds the old version.
        let fresh = store.update_claim(&stored).await.unwrap();
        assert!(matches!(
            store.update_claim(&stored).await,
            Err(StoreError::Conflict)
        ));
        store.update_claim(&fresh).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_creates_are_rejected() {
        let store = MemoryStore::new();
        let claim = ClaimRecord::new("task-a-0-0".to_string(), "a", "{}".to_string());
        store.create_claim(&claim).await.unwrap();
        assert!(matches!(
            store.create_claim(&claim).await,
            Err(StoreError::AlreadyExists)
        ));
    }

    #[tokio::test]
    async fn claim_listing_filters_on_the_assignee() {
        let store = MemoryStore::new();
        for (id, follower) in [("task-a-0-0", "a"), ("task-b-0-1", "b")] {
            let claim = ClaimRecord::new(id.to_string(), follower, "{}".to_string());
            store.create_claim(&claim).await.unwrap();
        }
        assert_eq!(store.list_claims(None).await.unwrap().len(), 2);
        let only_a = store.list_claims(Some("a")).await.unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].assigned_to(), Some("a"));
    }
}
