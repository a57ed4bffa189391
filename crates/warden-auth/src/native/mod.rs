//! Cached native metadata stores.
//!
//! Each [`NativeStore`] composes four parts:
//!
//! - [`lifecycle`] - state machine gating every operation
//! - [`cache`] - bounded map of parsed records with fetch timestamps
//! - [`reload`] - periodic refresh from the backing store
//! - [`invalidation`] - explicit clears, local and cluster-wide
//!
//! [`store`] wires them together and exposes the read and admin operations.

pub mod cache;
pub mod invalidation;
pub mod lifecycle;
pub mod reload;
pub mod store;

pub use cache::{CacheEntry, CacheStats, MetadataCache};
pub use invalidation::{InvalidationCoordinator, InvalidationReport, NodeOutcome};
pub use lifecycle::{Lifecycle, OperationGuard, StoreState};
pub use reload::{ReloadScheduler, ReloadStats, ReloadSummary};
pub use store::{AdminStore, NativeRolesStore, NativeStore, NativeStoreStats, NativeUsersStore};
