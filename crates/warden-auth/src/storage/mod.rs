//! Backing document store contract and the records it holds.
//!
//! The durable store is an external collaborator: this module only defines
//! what the native stores need from it ([`DocumentStore`]) and the typed
//! records parsed out of its documents ([`Role`], [`User`]).
//!
//! # Implementations
//!
//! - `warden-db-memory` - in-process document store

pub mod role;
pub mod user;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::StoreResult;
use crate::error::StoreError;

pub use role::{IndicesPrivileges, Role, RoleBuilder};
pub use user::{User, UserBuilder};

/// Raw document as kept by the backing store.
pub type Document = serde_json::Value;

// =============================================================================
// Store Kind
// =============================================================================

/// The type of metadata a store instance holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Role descriptors.
    Roles,
    /// User credential records.
    Users,
}

impl StoreKind {
    /// Every store kind, in a stable order.
    pub const ALL: [StoreKind; 2] = [StoreKind::Roles, StoreKind::Users];

    /// Returns the lowercase name used in paths and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Roles => "roles",
            Self::Users => "users",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "roles" | "role" => Ok(Self::Roles),
            "users" | "user" => Ok(Self::Users),
            other => Err(format!("unknown store kind '{other}'")),
        }
    }
}

// =============================================================================
// Metadata Record
// =============================================================================

/// A parsed, immutable record held in a native store's cache.
///
/// Identity is the record name, unique within its [`StoreKind`]. Documents in
/// the backing store are keyed by that name, so parsing always takes the name
/// from the document id rather than trusting the document body.
pub trait MetadataRecord:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Store type holding records of this kind.
    const KIND: StoreKind;

    /// Returns the record name.
    fn name(&self) -> &str;

    /// Overwrites the record name.
    fn set_name(&mut self, name: String);

    /// Parses a backing-store document stored under `name`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidRecord` if the document does not match the
    /// record schema.
    fn from_document(name: &str, document: Document) -> StoreResult<Self> {
        let mut record: Self = serde_json::from_value(document)
            .map_err(|e| StoreError::invalid_record(Self::KIND, name, e.to_string()))?;
        record.set_name(name.to_string());
        Ok(record)
    }

    /// Returns the view of the record handed to API clients.
    fn public_view(&self) -> Self {
        self.clone()
    }

    /// Returns `true` if fields stripped by [`MetadataRecord::public_view`] are
    /// absent, as in a document written back by an API client.
    fn lacks_private_fields(&self) -> bool {
        false
    }

    /// Copies the fields stripped by [`MetadataRecord::public_view`] from the
    /// stored version of this record.
    fn restore_private_fields(&mut self, _stored: &Self) {}

    /// Serializes the record into a backing-store document.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidRecord` if serialization fails.
    fn to_document(&self) -> StoreResult<Document> {
        serde_json::to_value(self)
            .map_err(|e| StoreError::invalid_record(Self::KIND, self.name(), e.to_string()))
    }
}

/// Accepts `null` wherever a list is expected.
pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// Document Store Trait
// =============================================================================

/// Storage operations the native stores consume from the durable document store.
///
/// The store is passive and externally synchronized: callers take no client-side
/// locks. Read-your-writes is assumed on a single node; other nodes may lag.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Checks connectivity. Called while a native store is `STARTING`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::BackingStore` if the store cannot be reached.
    async fn ping(&self) -> StoreResult<()>;

    /// Fetches one document by id. Returns `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::BackingStore` on I/O failure.
    async fn get(&self, kind: StoreKind, name: &str) -> StoreResult<Option<Document>>;

    /// Returns every document of the given kind as `(id, document)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::BackingStore` on I/O failure.
    async fn scan_all(&self, kind: StoreKind) -> StoreResult<Vec<(String, Document)>>;

    /// Creates or replaces a document. Returns `true` if it was created.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::BackingStore` on I/O failure.
    async fn put(&self, kind: StoreKind, name: &str, document: Document) -> StoreResult<bool>;

    /// Merges the top-level fields of `partial` into an existing document.
    /// Returns `false` if no document exists under `name`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::BackingStore` on I/O failure.
    async fn update(&self, kind: StoreKind, name: &str, partial: Document) -> StoreResult<bool>;

    /// Deletes a document. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::BackingStore` on I/O failure.
    async fn delete(&self, kind: StoreKind, name: &str) -> StoreResult<bool>;
}

/// Merges the top-level fields of `partial` into `target`.
///
/// Non-object values replace the target wholesale.
pub fn merge_document(target: &mut Document, partial: Document) {
    match (target.as_object_mut(), partial) {
        (Some(fields), Document::Object(updates)) => {
            for (key, value) in updates {
                fields.insert(key, value);
            }
        }
        (_, partial) => *target = partial,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_store_kind_parse_and_display() {
        assert_eq!("roles".parse::<StoreKind>().unwrap(), StoreKind::Roles);
        assert_eq!("user".parse::<StoreKind>().unwrap(), StoreKind::Users);
        assert!("groups".parse::<StoreKind>().is_err());
        assert_eq!(StoreKind::Users.to_string(), "users");
    }

    #[test]
    fn test_merge_document_overrides_fields() {
        let mut doc = json!({"cluster": ["none"], "run_as": []});
        merge_document(&mut doc, json!({"run_as": ["r3"]}));
        assert_eq!(doc, json!({"cluster": ["none"], "run_as": ["r3"]}));
    }

    #[test]
    fn test_merge_document_replaces_non_object() {
        let mut doc = json!("scalar");
        merge_document(&mut doc, json!({"a": 1}));
        assert_eq!(doc, json!({"a": 1}));
    }

    #[test]
    fn test_from_document_takes_name_from_id() {
        let role = Role::from_document("ops", json!({"name": "other", "cluster": ["all"]})).unwrap();
        assert_eq!(role.name, "ops");
        assert_eq!(role.cluster, vec!["all".to_string()]);
    }

    #[test]
    fn test_from_document_rejects_bad_schema() {
        let err = Role::from_document("ops", json!({"cluster": "all"})).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRecord { .. }));
    }
}
