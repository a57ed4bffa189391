use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use papaya::HashMap as PapayaHashMap;
use time::OffsetDateTime;
use warden_auth::storage::merge_document;
use warden_auth::{Document, DocumentStore, StoreError, StoreKind, StoreResult};

pub type StorageKey = String; // Format: "kind/name"

pub(crate) fn make_storage_key(kind: StoreKind, name: &str) -> StorageKey {
    format!("{kind}/{name}")
}

/// A document plus its write metadata.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub document: Document,
    /// Monotonic across the whole store; bumped on every write.
    pub version: u64,
    pub last_updated: OffsetDateTime,
}

/// In-memory document store using papaya lock-free HashMap.
///
/// Writes made through this type are immediately visible to every reader,
/// including writes that bypass the native stores (the "out-of-band" edits
/// the reload scheduler exists to pick up).
///
/// [`InMemoryDocumentStore::set_available`] simulates an outage: every
/// operation fails with `StoreError::BackingStore` until it is switched back.
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    data: Arc<PapayaHashMap<StorageKey, StoredDocument>>,
    version_counter: AtomicU64,
    available: AtomicBool,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    /// Creates an empty, available store.
    pub fn new() -> Self {
        Self {
            data: Arc::new(PapayaHashMap::new()),
            version_counter: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Switches simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        tracing::debug!(available, "In-memory document store availability changed");
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Returns the stored document with its write metadata.
    pub fn stored(&self, kind: StoreKind, name: &str) -> Option<StoredDocument> {
        let guard = self.data.pin();
        guard.get(&make_storage_key(kind, name)).cloned()
    }

    /// Number of documents of the given kind.
    pub fn count(&self, kind: StoreKind) -> usize {
        let prefix = make_storage_key(kind, "");
        let guard = self.data.pin();
        guard.iter().filter(|(k, _)| k.starts_with(&prefix)).count()
    }

    fn next_version(&self) -> u64 {
        self.version_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn stamp(&self, document: Document) -> StoredDocument {
        StoredDocument {
            document,
            version: self.next_version(),
            last_updated: OffsetDateTime::now_utc(),
        }
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::storage("in-memory document store is unavailable"))
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }

    async fn get(&self, kind: StoreKind, name: &str) -> StoreResult<Option<Document>> {
        self.check_available()?;
        let guard = self.data.pin();
        Ok(guard
            .get(&make_storage_key(kind, name))
            .map(|stored| stored.document.clone()))
    }

    async fn scan_all(&self, kind: StoreKind) -> StoreResult<Vec<(String, Document)>> {
        self.check_available()?;
        let prefix = make_storage_key(kind, "");
        let guard = self.data.pin();

        let mut documents: Vec<(String, Document)> = guard
            .iter()
            .filter_map(|(key, stored)| {
                key.strip_prefix(&prefix)
                    .map(|name| (name.to_string(), stored.document.clone()))
            })
            .collect();
        documents.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(documents)
    }

    async fn put(&self, kind: StoreKind, name: &str, document: Document) -> StoreResult<bool> {
        self.check_available()?;
        let stored = self.stamp(document);
        let guard = self.data.pin();
        Ok(guard.insert(make_storage_key(kind, name), stored).is_none())
    }

    async fn update(&self, kind: StoreKind, name: &str, partial: Document) -> StoreResult<bool> {
        self.check_available()?;
        let guard = self.data.pin();
        let updated = guard.update(make_storage_key(kind, name), |current| {
            let mut document = current.document.clone();
            merge_document(&mut document, partial.clone());
            self.stamp(document)
        });
        Ok(updated.is_some())
    }

    async fn delete(&self, kind: StoreKind, name: &str) -> StoreResult<bool> {
        self.check_available()?;
        let guard = self.data.pin();
        Ok(guard.remove(&make_storage_key(kind, name)).is_some())
    }
}
