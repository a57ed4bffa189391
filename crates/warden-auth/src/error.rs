//! Error types for the native metadata stores.
//!
//! Every failure the cache/invalidation subsystem can report is a variant of
//! [`StoreError`]. None of them is fatal to the process: the worst outcome is a
//! cache entry that stays stale until the next reload tick or invalidation.

use std::fmt;
use std::time::Duration;

use crate::native::lifecycle::StoreState;
use crate::storage::StoreKind;

/// Errors that can occur while operating a native metadata store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The store is not in `STARTED`; the operation was rejected without waiting.
    #[error("{kind} store is unavailable (state: {state})")]
    Unavailable {
        /// Store type that rejected the operation.
        kind: StoreKind,
        /// State observed when the operation was attempted.
        state: StoreState,
    },

    /// The backing document store failed.
    #[error("Backing store error: {message}")]
    BackingStore {
        /// Description of the I/O failure.
        message: String,
    },

    /// A peer did not answer an invalidation request within the per-node timeout.
    #[error("Node {node} did not acknowledge within {timeout:?}")]
    BroadcastTimeout {
        /// Node that timed out.
        node: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// A lifecycle transition was requested from a state that does not allow it.
    #[error("Cannot {operation} {kind} store in state {state}")]
    IllegalState {
        /// Store type.
        kind: StoreKind,
        /// The requested transition (`start`, `reset`, ...).
        operation: &'static str,
        /// State the store was in.
        state: StoreState,
    },

    /// A backing-store document could not be parsed into a record.
    #[error("Invalid {kind} document '{name}': {message}")]
    InvalidRecord {
        /// Store type.
        kind: StoreKind,
        /// Document id.
        name: String,
        /// Parse failure.
        message: String,
    },

    /// An invalidation request could not be delivered to a peer.
    #[error("Transport error for node {node}: {message}")]
    Transport {
        /// Destination node.
        node: String,
        /// Description of the delivery failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(kind: StoreKind, state: StoreState) -> Self {
        Self::Unavailable { kind, state }
    }

    /// Creates a new `BackingStore` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::BackingStore {
            message: message.into(),
        }
    }

    /// Creates a new `BroadcastTimeout` error.
    #[must_use]
    pub fn broadcast_timeout(node: impl Into<String>, timeout: Duration) -> Self {
        Self::BroadcastTimeout {
            node: node.into(),
            timeout,
        }
    }

    /// Creates a new `IllegalState` error.
    #[must_use]
    pub fn illegal_state(kind: StoreKind, operation: &'static str, state: StoreState) -> Self {
        Self::IllegalState {
            kind,
            operation,
            state,
        }
    }

    /// Creates a new `InvalidRecord` error.
    #[must_use]
    pub fn invalid_record(
        kind: StoreKind,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidRecord {
            kind,
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Transport` error.
    #[must_use]
    pub fn transport(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if the caller should wait for the store to start and retry.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }

    /// Returns `true` if the failure concerns a single peer during broadcast.
    #[must_use]
    pub fn is_peer_failure(&self) -> bool {
        matches!(self, Self::BroadcastTimeout { .. } | Self::Transport { .. })
    }

    /// Returns the error category for logging purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unavailable { .. } | Self::IllegalState { .. } => ErrorCategory::Lifecycle,
            Self::BackingStore { .. } => ErrorCategory::Infrastructure,
            Self::BroadcastTimeout { .. } | Self::Transport { .. } => ErrorCategory::Cluster,
            Self::InvalidRecord { .. } => ErrorCategory::Validation,
        }
    }
}

/// Categories of store errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Lifecycle errors (store not started, illegal transition).
    Lifecycle,
    /// Backing document store failures.
    Infrastructure,
    /// Failures talking to other cluster nodes.
    Cluster,
    /// Malformed documents.
    Validation,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lifecycle => write!(f, "lifecycle"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Cluster => write!(f, "cluster"),
            Self::Validation => write!(f, "validation"),
        }
    }
}
