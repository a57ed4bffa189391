//! Admin routes for the native stores.
//!
//! # Routes
//!
//! ```text
//! POST   /_native/{kind}/{names}/_cache/clear[?local_only=true]
//! GET    /_native/{kind}/_state
//! GET    /_native/{kind}/{name}
//! PUT    /_native/{kind}/{name}
//! DELETE /_native/{kind}/{name}
//! ```
//!
//! `{kind}` is `roles` or `users`. `{names}` is a comma-separated list, or
//! `*` / `_all` for every cached entry. Authenticating the administrator is
//! left to middleware layered on top of [`admin_router`].

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;

use crate::cluster::InvalidationTarget;
use crate::http::error::AdminError;
use crate::native::{AdminStore, InvalidationReport, NativeStoreStats};
use crate::storage::{Document, StoreKind};

// =============================================================================
// State Types
// =============================================================================

/// Stores reachable through the admin routes, by type.
#[derive(Clone, Default)]
pub struct AdminState {
    stores: Arc<HashMap<StoreKind, Arc<dyn AdminStore>>>,
}

impl AdminState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a store, replacing any store of the same type.
    #[must_use]
    pub fn with_store(self, store: Arc<dyn AdminStore>) -> Self {
        let mut stores = Arc::unwrap_or_clone(self.stores);
        stores.insert(store.kind(), store);
        Self {
            stores: Arc::new(stores),
        }
    }

    fn store(&self, kind: &str) -> Result<&Arc<dyn AdminStore>, AdminError> {
        kind.parse::<StoreKind>()
            .ok()
            .and_then(|kind| self.stores.get(&kind))
            .ok_or_else(|| AdminError::UnknownKind(kind.to_string()))
    }
}

/// Query parameters for cache clearing.
#[derive(Debug, Default, Deserialize)]
pub struct ClearCacheParams {
    /// Skip the cluster broadcast.
    #[serde(default)]
    pub local_only: bool,
}

/// Builds the admin router.
pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/_native/{kind}/{names}/_cache/clear", post(clear_cache_handler))
        .route("/_native/{kind}/_state", get(state_handler))
        .route(
            "/_native/{kind}/{name}",
            get(get_record_handler)
                .put(put_record_handler)
                .delete(delete_record_handler),
        )
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Clears cached entries on this node and, unless `local_only`, on every peer.
pub async fn clear_cache_handler(
    State(state): State<AdminState>,
    Path((kind, names)): Path<(String, String)>,
    Query(params): Query<ClearCacheParams>,
) -> Result<Json<InvalidationReport>, AdminError> {
    let store = state.store(&kind)?;
    let target = InvalidationTarget::parse(&names);
    let report = store.invalidate(target, params.local_only).await?;
    Ok(Json(report))
}

pub async fn state_handler(
    State(state): State<AdminState>,
    Path(kind): Path<String>,
) -> Result<Json<NativeStoreStats>, AdminError> {
    Ok(Json(state.store(&kind)?.stats()))
}

pub async fn get_record_handler(
    State(state): State<AdminState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Json<Document>, AdminError> {
    let store = state.store(&kind)?;
    store
        .fetch_document(&name)
        .await?
        .map(Json)
        .ok_or_else(|| AdminError::not_found(store.kind(), name))
}

/// Creates or replaces a record. Responds `201` on create, `200` on replace.
pub async fn put_record_handler(
    State(state): State<AdminState>,
    Path((kind, name)): Path<(String, String)>,
    Json(document): Json<Document>,
) -> Result<impl IntoResponse, AdminError> {
    let store = state.store(&kind)?;
    let created = store.store_document(&name, document).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({ "created": created }))))
}

pub async fn delete_record_handler(
    State(state): State<AdminState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AdminError> {
    let store = state.store(&kind)?;
    if store.delete_document(&name).await? {
        Ok(Json(json!({ "found": true })))
    } else {
        Err(AdminError::not_found(store.kind(), name))
    }
}
