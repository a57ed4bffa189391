//! In-crate test doubles.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::StoreResult;
use crate::error::StoreError;
use crate::storage::{Document, DocumentStore, StoreKind, merge_document};

/// Document store backed by a map, with failure injection.
pub(crate) struct MockDocumentStore {
    documents: RwLock<BTreeMap<(StoreKind, String), Document>>,
    available: AtomicBool,
    scan_calls: AtomicUsize,
    fail_count: AtomicUsize,
    get_calls: AtomicUsize,
    scan_delay_ms: AtomicU64,
    get_delay_ms: AtomicU64,
}

impl MockDocumentStore {
    pub(crate) fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            scan_calls: AtomicUsize::new(0),
            fail_count: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            scan_delay_ms: AtomicU64::new(0),
            get_delay_ms: AtomicU64::new(0),
        }
    }

    /// Writes a document directly, bypassing any native store.
    pub(crate) fn insert(&self, kind: StoreKind, name: &str, document: Document) {
        self.documents
            .write()
            .insert((kind, name.to_string()), document);
    }

    /// Makes the next `count` scans fail.
    pub(crate) fn set_fail_count(&self, count: usize) {
        self.fail_count
            .store(self.scan_calls.load(Ordering::SeqCst) + count, Ordering::SeqCst);
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub(crate) fn set_scan_delay(&self, delay: Duration) {
        self.scan_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn set_get_delay(&self, delay: Duration) {
        self.get_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::storage("Simulated storage outage"))
        }
    }
}

#[async_trait]
impl DocumentStore for MockDocumentStore {
    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }

    async fn get(&self, kind: StoreKind, name: &str) -> StoreResult<Option<Document>> {
        self.check_available()?;
        self.get_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.get_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(self
            .documents
            .read()
            .get(&(kind, name.to_string()))
            .cloned())
    }

    async fn scan_all(&self, kind: StoreKind) -> StoreResult<Vec<(String, Document)>> {
        self.check_available()?;

        let delay = self.scan_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let call = self.scan_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_count.load(Ordering::SeqCst) {
            return Err(StoreError::storage("Simulated storage failure"));
        }

        Ok(self
            .documents
            .read()
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, name), document)| (name.clone(), document.clone()))
            .collect())
    }

    async fn put(&self, kind: StoreKind, name: &str, document: Document) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self
            .documents
            .write()
            .insert((kind, name.to_string()), document)
            .is_none())
    }

    async fn update(&self, kind: StoreKind, name: &str, partial: Document) -> StoreResult<bool> {
        self.check_available()?;
        let mut documents = self.documents.write();
        match documents.get_mut(&(kind, name.to_string())) {
            Some(document) => {
                merge_document(document, partial);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, kind: StoreKind, name: &str) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self
            .documents
            .write()
            .remove(&(kind, name.to_string()))
            .is_some())
    }
}
