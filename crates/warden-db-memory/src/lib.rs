//! In-memory document store for Warden.
//!
//! This crate provides an in-memory implementation of the `DocumentStore`
//! trait from `warden-auth`, using papaya lock-free HashMap for concurrent access.
//!
//! # Example
//!
//! ```ignore
//! use warden_db_memory::InMemoryDocumentStore;
//! use warden_auth::{DocumentStore, StoreKind};
//!
//! let store = InMemoryDocumentStore::new();
//! store.put(StoreKind::Roles, "admin", serde_json::json!({"cluster": ["all"]})).await?;
//! ```

pub mod storage;

pub use storage::{InMemoryDocumentStore, StorageKey, StoredDocument};

/// Type alias for a shareable document store.
pub type DynDocumentStore = std::sync::Arc<dyn warden_auth::DocumentStore>;

/// Creates a new in-memory document store.
pub fn create_document_store() -> DynDocumentStore {
    std::sync::Arc::new(InMemoryDocumentStore::new())
}
