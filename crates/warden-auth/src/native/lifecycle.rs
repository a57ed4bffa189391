//! Lifecycle state machine shared by every native store.
//!
//! ```text
//!                 start()              ok
//! INITIALIZED ──────────► STARTING ──────────► STARTED
//!      ▲                   │   │                │  │
//!      │ reset()     error │   │ stop()  stop() │  │ background failure
//!      │                   ▼   ▼                ▼  ▼
//!      ├─────────────── FAILED ◄── STOPPING ◄──┘  FAILED
//!      │                              │
//!      └──────────── STOPPED ◄────────┘
//!                      │ start()
//!                      └──────────► STARTING
//! ```
//!
//! The current state lives in a [`watch`] channel so transitions are atomic
//! compare-and-set operations and observers can wait for a state without
//! polling. Foreground operations hold a shared [`OperationGuard`]; transitions
//! into and out of `STARTED` take the gate exclusively, so no operation overlaps
//! them. Acquiring the guard never waits: if a transition holds the gate, the
//! operation fails fast with `StoreError::Unavailable`.
//!
//! Each run (one `start()` to the next `stop()`) carries a cancellation token
//! that is cancelled as soon as the store enters `STOPPING`. Operations that
//! wait on the backing store race it through [`OperationGuard::abort_on_stop`],
//! so a hung fetch or scan never holds up a stop.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, watch};
use tokio_util::sync::CancellationToken;

use crate::StoreResult;
use crate::error::StoreError;
use crate::storage::StoreKind;

// =============================================================================
// Store State
// =============================================================================

/// Availability state of one store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreState {
    /// Constructed or reset, never started since.
    Initialized,
    /// Checking backing-store connectivity.
    Starting,
    /// Serving reads and writes.
    Started,
    /// Cancelling background work and draining operations.
    Stopping,
    /// Stopped cleanly; may be started again or reset.
    Stopped,
    /// Start or background work failed; must be reset before reuse.
    Failed,
}

impl StoreState {
    /// Returns `true` if the transition `self -> next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: StoreState) -> bool {
        use StoreState::*;
        matches!(
            (self, next),
            (Initialized | Stopped, Starting)
                | (Starting, Started | Stopping | Failed)
                | (Started, Stopping | Failed)
                | (Stopping, Stopped | Failed)
                | (Stopped | Failed, Initialized)
        )
    }

    /// Returns `true` once a stop has finished, successfully or not.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initialized => "INITIALIZED",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Operation Guard
// =============================================================================

/// Proof that the store was `STARTED` when an operation began.
///
/// While any guard is alive, the store cannot finish a transition out of
/// `STARTED`.
#[must_use]
pub struct OperationGuard<'a> {
    kind: StoreKind,
    stopping: CancellationToken,
    _gate: RwLockReadGuard<'a, ()>,
}

impl OperationGuard<'_> {
    /// Runs `operation` unless a `stop()` begins first.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` with state `STOPPING` if the store
    /// started stopping before `operation` completed, or the error of
    /// `operation` itself.
    pub async fn abort_on_stop<T, Fut>(&self, operation: Fut) -> StoreResult<T>
    where
        Fut: Future<Output = StoreResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.stopping.cancelled() => {
                tracing::debug!(kind = %self.kind, "Operation aborted by stop");
                Err(StoreError::unavailable(self.kind, StoreState::Stopping))
            }
            result = operation => result,
        }
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Enum-driven lifecycle composed into each native store.
pub struct Lifecycle {
    kind: StoreKind,
    state: watch::Sender<StoreState>,
    gate: RwLock<()>,
    run: Mutex<CancellationToken>,
}

impl Lifecycle {
    /// Creates a lifecycle in `INITIALIZED`.
    #[must_use]
    pub fn new(kind: StoreKind) -> Self {
        let (state, _) = watch::channel(StoreState::Initialized);
        Self {
            kind,
            state,
            gate: RwLock::new(()),
            run: Mutex::new(CancellationToken::new()),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> StoreState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    /// Admits a foreground operation if the store is `STARTED`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` immediately if the store is in any other
    /// state or a transition is in progress.
    pub fn enter(&self) -> StoreResult<OperationGuard<'_>> {
        let gate = self
            .gate
            .try_read()
            .map_err(|_| StoreError::unavailable(self.kind, self.state()))?;

        match self.state() {
            StoreState::Started => Ok(OperationGuard {
                kind: self.kind,
                stopping: self.run.lock().clone(),
                _gate: gate,
            }),
            state => Err(StoreError::unavailable(self.kind, state)),
        }
    }

    /// Runs `INITIALIZED|STOPPED -> STARTING -> STARTED`.
    ///
    /// `on_start` runs while the store is `STARTING` and holds the gate
    /// exclusively. If it fails, the store moves to `FAILED` and the cause is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::IllegalState` if the store is not `INITIALIZED` or
    /// `STOPPED`, or if a concurrent `stop()` interrupted the start. Returns the
    /// `on_start` error otherwise.
    pub async fn start<F, Fut>(&self, on_start: F) -> StoreResult<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<()>>,
    {
        self.transition(&[StoreState::Initialized, StoreState::Stopped], StoreState::Starting)
            .map_err(|state| StoreError::illegal_state(self.kind, "start", state))?;
        *self.run.lock() = CancellationToken::new();

        let _exclusive = self.gate.write().await;

        // A stop() may have won the race for the gate.
        let state = self.state();
        if state != StoreState::Starting {
            return Err(StoreError::illegal_state(self.kind, "start", state));
        }

        match on_start().await {
            Ok(()) => self
                .transition(&[StoreState::Starting], StoreState::Started)
                .map(|_| ())
                .map_err(|state| StoreError::illegal_state(self.kind, "start", state)),
            Err(e) => {
                tracing::error!(kind = %self.kind, error = %e, "Store failed to start");
                // A concurrent stop() owns the state from here on.
                let _ = self.transition(&[StoreState::Starting], StoreState::Failed);
                Err(e)
            }
        }
    }

    /// Runs `STARTED|STARTING -> STOPPING -> STOPPED`.
    ///
    /// Returns immediately if another caller is already stopping the store; use
    /// [`Lifecycle::wait_for`] to observe the end of that stop. Calling `stop()`
    /// on a store that is not running is a no-op.
    ///
    /// In-flight operations racing the backing store through
    /// [`OperationGuard::abort_on_stop`] are aborted at once. `on_stop` runs once
    /// the remaining operations have drained. It returns whether background
    /// work ended cleanly; `false` settles the store in `FAILED`.
    pub async fn stop<F, Fut>(&self, on_stop: F) -> StoreState
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        match self.transition(&[StoreState::Started, StoreState::Starting], StoreState::Stopping) {
            Ok(_) => {}
            Err(state) => {
                tracing::debug!(kind = %self.kind, state = %state, "Stop ignored");
                return state;
            }
        }

        self.run.lock().cancel();
        let _exclusive = self.gate.write().await;

        let target = if on_stop().await {
            StoreState::Stopped
        } else {
            StoreState::Failed
        };
        let _ = self.transition(&[StoreState::Stopping], target);
        target
    }

    /// Runs `STOPPED|FAILED -> INITIALIZED`, calling `on_reset` atomically with
    /// the transition.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::IllegalState` from any other state.
    pub fn reset<F: FnOnce()>(&self, on_reset: F) -> StoreResult<()> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| {
            if state.can_transition_to(StoreState::Initialized) {
                on_reset();
                tracing::info!(kind = %self.kind, from = %state, "Store reset");
                *state = StoreState::Initialized;
                true
            } else {
                outcome = Err(StoreError::illegal_state(self.kind, "reset", *state));
                false
            }
        });
        outcome
    }

    /// Moves a running store to `FAILED` after a background failure.
    pub fn fail(&self) -> bool {
        self.transition(&[StoreState::Started, StoreState::Starting], StoreState::Failed)
            .is_ok()
    }

    /// Waits until `predicate` holds for the current state.
    ///
    /// Returns `None` if `timeout` elapses first.
    pub async fn wait_for<P>(&self, predicate: P, timeout: Duration) -> Option<StoreState>
    where
        P: FnMut(&StoreState) -> bool,
    {
        let mut receiver = self.state.subscribe();
        match tokio::time::timeout(timeout, receiver.wait_for(predicate)).await {
            Ok(Ok(state)) => Some(*state),
            _ => None,
        }
    }

    /// Compare-and-set: moves to `to` if the current state is one of `from`.
    ///
    /// Returns the previous state on success and the current state otherwise.
    fn transition(&self, from: &[StoreState], to: StoreState) -> Result<StoreState, StoreState> {
        debug_assert!(from.iter().all(|f| f.can_transition_to(to)));

        let mut outcome = Err(to);
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                outcome = Ok(*state);
                *state = to;
                true
            } else {
                outcome = Err(*state);
                false
            }
        });

        if let Ok(previous) = outcome {
            tracing::info!(kind = %self.kind, from = %previous, to = %to, "Store state changed");
        }
        outcome
    }
}

impl fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifecycle")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}
