//! Error responses for the admin HTTP routes.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::StoreError;
use crate::storage::StoreKind;

/// Errors returned by the admin handlers.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// The path names a store type this node does not host.
    #[error("Unknown store type '{0}'")]
    UnknownKind(String),

    /// The requested record does not exist.
    #[error("{kind} record '{name}' not found")]
    NotFound {
        kind: StoreKind,
        name: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdminError {
    #[must_use]
    pub fn not_found(kind: StoreKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Returns the HTTP status and a short machine-readable type.
    #[must_use]
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            Self::UnknownKind(_) => (StatusCode::BAD_REQUEST, "unknown_store_type"),
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            Self::Store(e) => match e {
                StoreError::Unavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable"),
                StoreError::IllegalState { .. } => (StatusCode::CONFLICT, "illegal_state"),
                StoreError::InvalidRecord { .. } => (StatusCode::BAD_REQUEST, "invalid_record"),
                StoreError::BackingStore { .. } => (StatusCode::BAD_GATEWAY, "backing_store"),
                StoreError::BroadcastTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "broadcast_timeout"),
                StoreError::Transport { .. } => (StatusCode::BAD_GATEWAY, "transport"),
            },
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Admin request failed");
        }

        let body = json!({
            "error": {
                "type": error_type,
                "reason": self.to_string(),
            },
            "status": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}
