//! Error types for the `ColdState` engine.
//!
//! The engine never swallows an error: every failure surfaces to the call
//! that initiated the failing transition - an explicit
//! [`take_and_change`](crate::repository::StateRepository::take_and_change),
//! or the subscribing/unsubscribing caller for the cold start/stop triggers.
//!
//! # Error Categories
//!
//! - **TransitionError**: failures while applying a state transition, tagged
//!   with the phase that failed so callers know whether the repository moved
//! - **MonitorError**: failures in a resource monitor's start/stop lifecycle
//!
//! Feature-supplied code (decisions, producers, hooks) fails with whatever
//! error type the feature uses; the engine carries it as a [`BoxedError`]
//! source inside the phase-tagged variant.

use crate::types::RepositoryName;
use thiserror::Error;

/// Boxed error type for failures raised by feature-supplied closures and
/// hooks. Any `std::error::Error + Send + Sync` converts into it with `?`.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while applying a state transition.
///
/// The variant identifies the phase that failed, which in turn determines
/// whether the repository moved:
///
/// - `Decision`, `Produce`, `BeforeDetach`: the repository remains on the
///   state it held before the transition; nothing was published.
/// - `AfterAttach`: the new state was already published and remains current;
///   the failure is reported, not rolled back.
/// - `TeardownIncomplete`, `RepositoryClosed`: engine-level conditions.
#[derive(Debug, Error)]
pub enum TransitionError {
    /// The transition's decision step failed. No state change occurred.
    #[error("transition decision failed: {0}")]
    Decision(#[source] BoxedError),

    /// The next-state producer failed. The repository remains on the prior
    /// state.
    #[error("next-state producer failed: {0}")]
    Produce(#[source] BoxedError),

    /// The outgoing state's before-detach hook failed. The publish was
    /// aborted and the outgoing state remains current.
    #[error("before-detach hook of '{state}' failed: {source}")]
    BeforeDetach {
        /// Label of the state whose hook failed.
        state: &'static str,
        /// The underlying hook failure.
        #[source]
        source: BoxedError,
    },

    /// The incoming state's after-attach hook failed. The incoming state was
    /// already published and remains current.
    #[error("after-attach hook of '{state}' failed (state remains current): {source}")]
    AfterAttach {
        /// Label of the state whose hook failed.
        state: &'static str,
        /// The underlying hook failure.
        #[source]
        source: BoxedError,
    },

    /// A cold-stop applied the deinitialize transition the maximum number of
    /// times without reaching an inactive-family state.
    #[error("teardown did not reach an inactive state after {hops} transitions")]
    TeardownIncomplete {
        /// Number of deinitialize applications attempted.
        hops: usize,
    },

    /// The repository's transition worker is no longer running.
    #[error("state repository '{0}' is closed")]
    RepositoryClosed(RepositoryName),
}

impl TransitionError {
    /// Returns `true` if the repository still holds the state it held before
    /// the failing transition began.
    pub const fn left_state_unchanged(&self) -> bool {
        !matches!(self, Self::AfterAttach { .. } | Self::TeardownIncomplete { .. })
    }
}

/// Errors that can occur in a resource monitor's start/stop lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    /// `start_monitoring` was called on a monitor that is already running,
    /// or on a monitor that already completed a start/stop cycle.
    #[error("monitor already started")]
    AlreadyStarted,

    /// `stop_monitoring` was called on a monitor that was never started.
    #[error("monitor not started")]
    NotStarted,

    /// The monitor's event channel is closed; events can no longer be
    /// delivered.
    #[error("monitor event channel closed")]
    ChannelClosed,

    /// An unexpected internal error occurred.
    #[error("internal monitor error: {0}")]
    Internal(String),
}

/// Type alias for transition results.
pub type TransitionResult<T> = Result<T, TransitionError>;

/// Type alias for monitor results.
pub type MonitorResult<T> = Result<T, MonitorError>;
