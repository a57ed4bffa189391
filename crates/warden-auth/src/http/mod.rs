//! Axum handlers for the native store admin surface.
//!
//! - [`admin`] - cache clearing, record CRUD and state routes
//! - [`error`] - mapping of store errors to HTTP responses

pub mod admin;
pub mod error;

pub use admin::{
    AdminState, ClearCacheParams, admin_router, clear_cache_handler, delete_record_handler,
    get_record_handler, put_record_handler, state_handler,
};
pub use error::AdminError;
