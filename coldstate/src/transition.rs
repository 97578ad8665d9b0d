//! Transition request vocabulary.
//!
//! A transition request splits into a synchronous *decision* evaluated
//! against the current state and an asynchronous *producer* that
//! materializes the next state. The split lets the decision borrow the
//! current state's immutable data while the producer performs whatever
//! asynchronous work the feature needs (resolving a permission, creating a
//! monitor) inside the repository's exclusive section.

use crate::errors::BoxedError;
use crate::types::{StateRevision, Timestamp};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Boxed future that materializes the next state.
pub type NextState<S> = BoxFuture<'static, Result<S, BoxedError>>;

/// A reusable transition function shared across invocations, as used for the
/// cold initialize/deinitialize transitions.
pub type SharedTransition<S> =
    Arc<dyn Fn(&S) -> Result<Decision<S>, BoxedError> + Send + Sync>;

/// The outcome of a transition's decision step.
pub enum Decision<S> {
    /// Keep the current state. No hooks fire, nothing is published.
    Remain,
    /// Replace the current state with the one the producer yields.
    Advance(NextState<S>),
}

impl<S> Decision<S>
where
    S: Send + 'static,
{
    /// Advance through an asynchronous producer.
    pub fn advance<F>(producer: F) -> Self
    where
        F: Future<Output = Result<S, BoxedError>> + Send + 'static,
    {
        Self::Advance(Box::pin(producer))
    }

    /// Advance to an already-materialized next state.
    pub fn advance_to(next: S) -> Self {
        Self::Advance(Box::pin(async move { Ok(next) }))
    }

    /// Returns `true` for [`Decision::Remain`].
    pub const fn is_remain(&self) -> bool {
        matches!(self, Self::Remain)
    }
}

impl<S> fmt::Debug for Decision<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remain => f.write_str("Decision::Remain"),
            Self::Advance(_) => f.write_str("Decision::Advance(..)"),
        }
    }
}

/// What a completed transition did.
#[derive(Debug, Clone)]
pub enum Outcome<S> {
    /// The decision kept the current state.
    Remained,
    /// The repository moved from `from` to `to`.
    Changed {
        /// The state that was replaced.
        from: S,
        /// The state that is now current.
        to: S,
    },
}

impl<S> Outcome<S> {
    /// Returns `true` if the transition published a new state.
    pub const fn changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }

    /// The newly installed state, if the transition published one.
    pub fn new_state(&self) -> Option<&S> {
        match self {
            Self::Remained => None,
            Self::Changed { to, .. } => Some(to),
        }
    }
}

/// A published state record: the state plus its revision and publish time.
#[derive(Debug, Clone)]
pub struct Published<S> {
    /// Monotonic revision of this publish. The constructed, never-published
    /// state carries [`StateRevision::initial`].
    pub revision: StateRevision,
    /// When the state was installed.
    pub recorded_at: Timestamp,
    /// The state itself.
    pub state: S,
}

impl<S> Published<S> {
    /// Wraps the initial state a repository is constructed with.
    pub fn initial(state: S) -> Self {
        Self {
            revision: StateRevision::initial(),
            recorded_at: Timestamp::now(),
            state,
        }
    }

    /// Wraps a newly published state at the given revision.
    pub fn new(revision: StateRevision, state: S) -> Self {
        Self {
            revision,
            recorded_at: Timestamp::now(),
            state,
        }
    }
}
