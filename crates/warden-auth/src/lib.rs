//! # warden-auth
//!
//! Per-node caches of authorization metadata (roles and users) backed by a
//! durable document store, kept consistent across a cluster.
//!
//! This crate provides:
//! - A lifecycle state machine gating every store operation
//! - A bounded metadata cache with fetch timestamps
//! - A periodic reload scheduler picking up out-of-band writes
//! - An invalidation coordinator fanning cache clears out to peers
//! - Axum handlers for the admin surface
//!
//! ## Modules
//!
//! - [`config`] - Native store configuration
//! - [`storage`] - Backing store contract and record types
//! - [`native`] - The cached stores and their components
//! - [`cluster`] - Cluster transport for invalidation requests
//! - [`http`] - Admin HTTP routes
//!
//! ## Example
//!
//! ```ignore
//! use warden_auth::prelude::*;
//!
//! let cluster = LocalCluster::new();
//! let transport = cluster.join("node-1");
//! let roles = Arc::new(NativeRolesStore::new(backing, transport.clone(), &config));
//! transport.register(StoreKind::Roles, &roles.invalidation_handler());
//!
//! roles.start().await?;
//! let role = roles.role("admin").await?;
//! ```

pub mod cluster;
pub mod config;
pub mod error;
pub mod http;
pub mod native;
pub mod storage;

#[cfg(test)]
pub(crate) mod testutil;

pub use cluster::{
    ClusterTransport, InvalidationHandler, InvalidationRequest, InvalidationTarget, LocalCluster,
    LocalTransport, NodeId,
};
pub use config::{BroadcastConfig, CacheConfig, ConfigError, NativeStoreConfig};
pub use error::{ErrorCategory, StoreError};
pub use http::{AdminError, AdminState, admin_router};
pub use native::{
    AdminStore, InvalidationReport, NativeRolesStore, NativeStore, NativeStoreStats,
    NativeUsersStore, NodeOutcome, ReloadSummary, StoreState,
};
pub use storage::{
    Document, DocumentStore, IndicesPrivileges, MetadataRecord, Role, StoreKind, User,
};

/// Type alias for native store results.
pub type StoreResult<T> = Result<T, StoreError>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use warden_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::StoreResult;
    pub use crate::cluster::{
        ClusterTransport, InvalidationTarget, LocalCluster, LocalTransport, NodeId,
    };
    pub use crate::config::NativeStoreConfig;
    pub use crate::error::StoreError;
    pub use crate::native::{
        InvalidationReport, NativeRolesStore, NativeStore, NativeUsersStore, StoreState,
    };
    pub use crate::storage::{Document, DocumentStore, MetadataRecord, Role, StoreKind, User};
}
