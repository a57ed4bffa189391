//! Store facade: one cached metadata store per type and node.
//!
//! [`NativeStore`] composes the lifecycle, the cache, the reload scheduler and
//! the invalidation coordinator of one store type. Reads are served from the
//! cache and fall back to a synchronous backing-store fetch on a miss.
//! Administrative writes go to the backing store, then drop the local cache
//! entry; other nodes pick the change up on their next reload tick or through
//! an explicit invalidation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::StoreResult;
use crate::cluster::{ClusterTransport, InvalidationHandler, InvalidationTarget};
use crate::config::NativeStoreConfig;
use crate::native::cache::{CacheStats, MetadataCache};
use crate::native::invalidation::{InvalidationCoordinator, InvalidationReport};
use crate::native::lifecycle::{Lifecycle, StoreState};
use crate::native::reload::{ReloadScheduler, ReloadStats, ReloadSummary};
use crate::storage::{Document, DocumentStore, MetadataRecord, Role, StoreKind, User};

/// Native store of role descriptors.
pub type NativeRolesStore = NativeStore<Role>;

/// Native store of user records.
pub type NativeUsersStore = NativeStore<User>;

/// Point-in-time view of a store for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct NativeStoreStats {
    pub kind: StoreKind,
    pub state: StoreState,
    pub cache: CacheStats,
    pub reload: ReloadStats,
}

// =============================================================================
// Native Store
// =============================================================================

/// Cached, cluster-aware store of one metadata type.
pub struct NativeStore<R> {
    lifecycle: Arc<Lifecycle>,
    cache: Arc<MetadataCache<R>>,
    store: Arc<dyn DocumentStore>,
    scheduler: Arc<ReloadScheduler<R>>,
    coordinator: Arc<InvalidationCoordinator<R>>,
}

impl<R: MetadataRecord> NativeStore<R> {
    /// Creates a store in `INITIALIZED`. Nothing runs until [`NativeStore::start`].
    #[must_use]
    pub fn new(
        store: Arc<dyn DocumentStore>,
        transport: Arc<dyn ClusterTransport>,
        config: &NativeStoreConfig,
    ) -> Self {
        let lifecycle = Arc::new(Lifecycle::new(R::KIND));
        let cache = Arc::new(MetadataCache::new(&config.cache));
        let scheduler = Arc::new(ReloadScheduler::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&lifecycle),
            config.reload_interval,
        ));
        let coordinator = Arc::new(InvalidationCoordinator::new(
            Arc::clone(&cache),
            Arc::clone(&lifecycle),
            transport,
            config.broadcast.node_timeout,
        ));

        Self {
            lifecycle,
            cache,
            store,
            scheduler,
            coordinator,
        }
    }

    #[must_use]
    pub fn kind(&self) -> StoreKind {
        R::KIND
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn state(&self) -> StoreState {
        self.lifecycle.state()
    }

    /// Checks backing-store connectivity and starts the reload scheduler.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::IllegalState` unless the store is `INITIALIZED` or
    /// `STOPPED`. Returns the backing-store error (leaving the store `FAILED`)
    /// if the connectivity check fails.
    pub async fn start(&self) -> StoreResult<()> {
        self.lifecycle
            .start(|| async move {
                self.store.ping().await?;
                self.scheduler.spawn();
                Ok(())
            })
            .await
    }

    /// Stops the reload scheduler, aborting a tick in progress.
    ///
    /// Returns the state the caller observed: `STOPPED` or `FAILED` once this
    /// call completed the stop, `STOPPING` if another caller is stopping the
    /// store, or the unchanged state if the store was not running.
    pub async fn stop(&self) -> StoreState {
        self.lifecycle
            .stop(|| async move { self.scheduler.shutdown().await })
            .await
    }

    /// Clears the cache and returns to `INITIALIZED`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::IllegalState` unless the store is `STOPPED` or `FAILED`.
    pub fn reset(&self) -> StoreResult<()> {
        self.lifecycle.reset(|| {
            self.cache.clear();
        })
    }

    /// Waits until the state satisfies `predicate`, or `timeout` elapses.
    pub async fn wait_for_state<P>(&self, predicate: P, timeout: Duration) -> Option<StoreState>
    where
        P: FnMut(&StoreState) -> bool,
    {
        self.lifecycle.wait_for(predicate, timeout).await
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Returns the named record, from the cache or the backing store.
    ///
    /// A fetched record is cached unless the name was cleared while the fetch
    /// was in flight.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the store is not `STARTED` or starts
    /// stopping during the fetch, or the backing-store or parse error on a miss.
    pub async fn get(&self, name: &str) -> StoreResult<Option<Arc<R>>> {
        let guard = self.lifecycle.enter()?;

        if let Some(record) = self.cache.get(name) {
            return Ok(Some(record));
        }

        let generation = self.cache.generation();
        let Some(document) = guard.abort_on_stop(self.store.get(R::KIND, name)).await? else {
            return Ok(None);
        };

        let record = Arc::new(R::from_document(name, document)?);
        if !self
            .cache
            .put_if_unchanged(name, Arc::clone(&record), generation)
        {
            tracing::debug!(kind = %R::KIND, name = %name, "Cache cleared during fetch, result not cached");
        }
        Ok(Some(record))
    }

    /// Returns the named records, skipping unknown names. With no names,
    /// returns every record in the backing store, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the store is not `STARTED`, or the
    /// backing-store error.
    pub async fn list(&self, names: &[String]) -> StoreResult<Vec<Arc<R>>> {
        if !names.is_empty() {
            let mut records = Vec::with_capacity(names.len());
            for name in names {
                if let Some(record) = self.get(name).await? {
                    records.push(record);
                }
            }
            return Ok(records);
        }

        let guard = self.lifecycle.enter()?;
        let mut records: Vec<Arc<R>> = guard
            .abort_on_stop(self.store.scan_all(R::KIND))
            .await?
            .into_iter()
            .filter_map(|(name, document)| match R::from_document(&name, document) {
                Ok(record) => Some(Arc::new(record)),
                Err(e) => {
                    tracing::warn!(kind = %R::KIND, name = %name, error = %e, "Skipping invalid document");
                    None
                }
            })
            .collect();
        records.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(records)
    }

    /// Cached entries ordered by name. Does not touch the backing store.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Arc<R>)> {
        self.cache.snapshot()
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Creates or replaces a record. Returns `true` if it was created.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the store is not `STARTED`, or the
    /// backing-store error. The cache is untouched on error.
    pub async fn add_or_update(&self, record: R) -> StoreResult<bool> {
        let _guard = self.lifecycle.enter()?;

        let document = record.to_document()?;
        let created = self.store.put(R::KIND, record.name(), document).await?;
        self.cache.remove(record.name());

        tracing::info!(kind = %R::KIND, name = %record.name(), created, "Record stored");
        Ok(created)
    }

    /// Merges top-level fields into an existing record. Returns `false` if no
    /// record exists under `name`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the store is not `STARTED`, or the
    /// backing-store error.
    pub async fn update_fields(&self, name: &str, partial: Document) -> StoreResult<bool> {
        let _guard = self.lifecycle.enter()?;

        let found = self.store.update(R::KIND, name, partial).await?;
        self.cache.remove(name);

        tracing::info!(kind = %R::KIND, name = %name, found, "Record updated");
        Ok(found)
    }

    /// Deletes a record. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the store is not `STARTED`, or the
    /// backing-store error.
    pub async fn delete(&self, name: &str) -> StoreResult<bool> {
        let _guard = self.lifecycle.enter()?;

        let found = self.store.delete(R::KIND, name).await?;
        self.cache.remove(name);

        tracing::info!(kind = %R::KIND, name = %name, found, "Record deleted");
        Ok(found)
    }

    // -------------------------------------------------------------------------
    // Cache control
    // -------------------------------------------------------------------------

    /// Invalidates cached entries here and, unless `local_only`, on every peer.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the store is not `STARTED`.
    pub async fn clear_cache(
        &self,
        target: InvalidationTarget,
        local_only: bool,
    ) -> StoreResult<InvalidationReport> {
        self.coordinator.invalidate(target, local_only).await
    }

    /// Runs a reload tick now, outside the schedule. A `stop()` aborts it
    /// like a scheduled tick.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` if the store is not `STARTED` or starts
    /// stopping during the scan, or the backing-store error.
    pub async fn reload_now(&self) -> StoreResult<ReloadSummary> {
        let guard = self.lifecycle.enter()?;
        guard.abort_on_stop(self.scheduler.reload_now()).await
    }

    /// The coordinator, for registering this store with the cluster transport.
    #[must_use]
    pub fn invalidation_handler(&self) -> Arc<dyn InvalidationHandler> {
        self.coordinator.clone()
    }

    #[must_use]
    pub fn stats(&self) -> NativeStoreStats {
        NativeStoreStats {
            kind: R::KIND,
            state: self.lifecycle.state(),
            cache: self.cache.stats(),
            reload: self.scheduler.stats(),
        }
    }
}

impl NativeStore<Role> {
    /// Looks up a role by name.
    ///
    /// # Errors
    ///
    /// See [`NativeStore::get`].
    pub async fn role(&self, name: &str) -> StoreResult<Option<Arc<Role>>> {
        self.get(name).await
    }
}

impl NativeStore<User> {
    /// Looks up a user by username.
    ///
    /// # Errors
    ///
    /// See [`NativeStore::get`].
    pub async fn user(&self, username: &str) -> StoreResult<Option<Arc<User>>> {
        self.get(username).await
    }
}

// =============================================================================
// Admin Store
// =============================================================================

/// Type-erased view of a native store, used by the admin HTTP routes.
///
/// Records cross this boundary as documents, already passed through
/// [`MetadataRecord::public_view`]. Writes keep the stored private fields of a
/// record when the incoming document omits them.
#[async_trait]
pub trait AdminStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    fn stats(&self) -> NativeStoreStats;

    async fn fetch_document(&self, name: &str) -> StoreResult<Option<Document>>;

    async fn store_document(&self, name: &str, document: Document) -> StoreResult<bool>;

    async fn delete_document(&self, name: &str) -> StoreResult<bool>;

    async fn invalidate(
        &self,
        target: InvalidationTarget,
        local_only: bool,
    ) -> StoreResult<InvalidationReport>;
}

#[async_trait]
impl<R: MetadataRecord> AdminStore for NativeStore<R> {
    fn kind(&self) -> StoreKind {
        R::KIND
    }

    fn stats(&self) -> NativeStoreStats {
        NativeStore::stats(self)
    }

    async fn fetch_document(&self, name: &str) -> StoreResult<Option<Document>> {
        match self.get(name).await? {
            Some(record) => record.public_view().to_document().map(Some),
            None => Ok(None),
        }
    }

    async fn store_document(&self, name: &str, document: Document) -> StoreResult<bool> {
        let mut record = R::from_document(name, document)?;
        // Documents read through the admin surface come back without credentials.
        if record.lacks_private_fields()
            && let Some(stored) = self.get(name).await?
        {
            record.restore_private_fields(&stored);
        }
        self.add_or_update(record).await
    }

    async fn delete_document(&self, name: &str) -> StoreResult<bool> {
        self.delete(name).await
    }

    async fn invalidate(
        &self,
        target: InvalidationTarget,
        local_only: bool,
    ) -> StoreResult<InvalidationReport> {
        self.clear_cache(target, local_only).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalCluster;
    use crate::error::StoreError;
    use crate::testutil::MockDocumentStore;
    use serde_json::json;

    fn roles_store(backing: Arc<MockDocumentStore>) -> NativeRolesStore {
        let transport = LocalCluster::new().join("node-1");
        NativeStore::new(
            backing,
            transport,
            &NativeStoreConfig::for_testing().with_reload_interval(Duration::from_secs(3600)),
        )
    }

    #[tokio::test]
    async fn test_operations_rejected_before_start() {
        let store = roles_store(Arc::new(MockDocumentStore::new()));
        assert_eq!(store.state(), StoreState::Initialized);

        let err = store.role("r1").await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Unavailable {
                state: StoreState::Initialized,
                ..
            }
        ));
        assert!(store.delete("r1").await.unwrap_err().is_unavailable());
        assert!(store.clear_cache(InvalidationTarget::All, true).await.is_err());
    }

    #[tokio::test]
    async fn test_miss_fetches_and_caches() {
        let backing = Arc::new(MockDocumentStore::new());
        backing.insert(StoreKind::Roles, "r1", json!({"cluster": ["none"]}));

        let store = roles_store(backing.clone());
        store.start().await.unwrap();

        let role = store.role("r1").await.unwrap().unwrap();
        assert_eq!(role.name, "r1");
        assert_eq!(backing.get_calls(), 1);

        store.role("r1").await.unwrap();
        assert_eq!(backing.get_calls(), 1);

        assert!(store.role("missing").await.unwrap().is_none());
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_writes_invalidate_local_entry() {
        let backing = Arc::new(MockDocumentStore::new());
        let store = roles_store(backing.clone());
        store.start().await.unwrap();

        assert!(store.add_or_update(Role::new("r1")).await.unwrap());
        assert!(store.role("r1").await.unwrap().unwrap().run_as.is_empty());

        let found = store
            .update_fields("r1", json!({"run_as": ["r1"]}))
            .await
            .unwrap();
        assert!(found);
        assert_eq!(store.role("r1").await.unwrap().unwrap().run_as, vec!["r1".to_string()]);

        assert!(!store.add_or_update(Role::new("r1")).await.unwrap());
        assert!(store.delete("r1").await.unwrap());
        assert!(store.role("r1").await.unwrap().is_none());
        assert!(!store.delete("r1").await.unwrap());
    }

    #[tokio::test]
    async fn test_direct_change_visible_after_clear() {
        let backing = Arc::new(MockDocumentStore::new());
        backing.insert(StoreKind::Roles, "r1", json!({}));
        let store = roles_store(backing.clone());
        store.start().await.unwrap();

        store.role("r1").await.unwrap();
        backing.insert(StoreKind::Roles, "r1", json!({"run_as": ["r1"]}));
        assert!(store.role("r1").await.unwrap().unwrap().run_as.is_empty());

        let report = store
            .clear_cache(InvalidationTarget::names(["r1"]), false)
            .await
            .unwrap();
        assert_eq!(report.cleared, 1);
        assert_eq!(store.role("r1").await.unwrap().unwrap().run_as, vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn test_start_failure_and_reset() {
        let backing = Arc::new(MockDocumentStore::new());
        backing.set_available(false);
        let store = roles_store(backing.clone());

        let err = store.start().await.unwrap_err();
        assert!(matches!(err, StoreError::BackingStore { .. }));
        assert_eq!(store.state(), StoreState::Failed);

        backing.set_available(true);
        store.reset().unwrap();
        store.start().await.unwrap();
        assert_eq!(store.state(), StoreState::Started);
    }

    #[tokio::test]
    async fn test_stop_reset_clears_cache() {
        let backing = Arc::new(MockDocumentStore::new());
        backing.insert(StoreKind::Roles, "r1", json!({}));
        let store = roles_store(backing.clone());
        store.start().await.unwrap();
        store.role("r1").await.unwrap();

        assert!(store.reset().is_err());
        assert_eq!(store.stop().await, StoreState::Stopped);
        assert_eq!(store.stop().await, StoreState::Stopped);
        assert!(store.role("r1").await.unwrap_err().is_unavailable());

        store.reset().unwrap();
        assert_eq!(store.state(), StoreState::Initialized);
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_document_surfaces_error() {
        let backing = Arc::new(MockDocumentStore::new());
        backing.insert(StoreKind::Roles, "bad", json!({"run_as": 7}));
        let store = roles_store(backing);
        store.start().await.unwrap();

        let err = store.role("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { .. }));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_list_all_and_named() {
        let backing = Arc::new(MockDocumentStore::new());
        backing.insert(StoreKind::Roles, "b", json!({}));
        backing.insert(StoreKind::Roles, "a", json!({}));
        backing.insert(StoreKind::Roles, "bad", json!({"cluster": 1}));
        let store = roles_store(backing);
        store.start().await.unwrap();

        let all = store.list(&[]).await.unwrap();
        let names: Vec<&str> = all.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let named = store
            .list(&["b".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(named.len(), 1);
    }

    #[tokio::test]
    async fn test_admin_view_redacts_user_hash() {
        let backing = Arc::new(MockDocumentStore::new());
        backing.insert(StoreKind::Users, "alice", json!({"password_hash": "secret", "roles": ["r1"]}));
        let store: NativeUsersStore = NativeStore::new(
            backing,
            LocalCluster::new().join("node-1"),
            &NativeStoreConfig::for_testing(),
        );
        store.start().await.unwrap();

        assert_eq!(store.user("alice").await.unwrap().unwrap().password_hash, "secret");

        let admin: &dyn AdminStore = &store;
        let document = admin.fetch_document("alice").await.unwrap().unwrap();
        assert!(document.get("password_hash").is_none());
        assert_eq!(document["roles"], json!(["r1"]));
        store.stop().await;
    }

    #[tokio::test]
    async fn test_admin_write_back_keeps_user_hash() {
        let backing = Arc::new(MockDocumentStore::new());
        backing.insert(StoreKind::Users, "alice", json!({"password_hash": "secret", "roles": ["r1"]}));
        let store: NativeUsersStore = NativeStore::new(
            backing,
            LocalCluster::new().join("node-1"),
            &NativeStoreConfig::for_testing(),
        );
        store.start().await.unwrap();
        let admin: &dyn AdminStore = &store;

        let mut document = admin.fetch_document("alice").await.unwrap().unwrap();
        document["full_name"] = json!("Alice");
        assert!(!admin.store_document("alice", document).await.unwrap());

        let alice = store.user("alice").await.unwrap().unwrap();
        assert_eq!(alice.password_hash, "secret");
        assert_eq!(alice.full_name.as_deref(), Some("Alice"));

        // An explicit hash replaces the stored one
        admin
            .store_document("alice", json!({"password_hash": "rotated"}))
            .await
            .unwrap();
        assert_eq!(store.user("alice").await.unwrap().unwrap().password_hash, "rotated");

        // A new user without a hash stays without one
        assert!(admin.store_document("bob", json!({"roles": []})).await.unwrap());
        assert!(store.user("bob").await.unwrap().unwrap().password_hash.is_empty());
        store.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_manual_reload() {
        let backing = Arc::new(MockDocumentStore::new());
        backing.insert(StoreKind::Roles, "r1", json!({}));
        let store = Arc::new(roles_store(backing.clone()));
        store.start().await.unwrap();
        backing.set_scan_delay(Duration::from_secs(600));

        let reload = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.reload_now().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        assert_eq!(store.stop().await, StoreState::Stopped);
        assert!(started.elapsed() < Duration::from_secs(1));

        let err = reload.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            StoreError::Unavailable {
                state: StoreState::Stopping,
                ..
            }
        ));
        assert!(store.snapshot().is_empty());
        assert_eq!(store.stats().reload.successful, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_aborts_hung_miss() {
        let backing = Arc::new(MockDocumentStore::new());
        backing.insert(StoreKind::Roles, "r1", json!({}));
        let store = Arc::new(roles_store(backing.clone()));
        store.start().await.unwrap();
        backing.set_get_delay(Duration::from_secs(600));

        let lookup = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.role("r1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = tokio::time::Instant::now();
        assert_eq!(store.stop().await, StoreState::Stopped);
        assert!(started.elapsed() < Duration::from_secs(1));

        assert!(lookup.await.unwrap().unwrap_err().is_unavailable());
        assert!(store.snapshot().is_empty());
    }
}
