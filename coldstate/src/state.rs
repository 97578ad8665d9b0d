//! State abstractions for the `ColdState` engine.
//!
//! A repository holds exactly one authoritative state at a time. Concrete
//! states are feature-defined (usually an enum per feature) and are pure,
//! immutable snapshots: a transition always installs a *new* value, never a
//! mutation of the previous one.
//!
//! States may carry lifecycle hooks. Hooks are optional capabilities: a state
//! advertises them through [`RepositoryState::detach_hook`] and
//! [`RepositoryState::attach_hook`], which default to `None`. The engine
//! checks for the capability before each transition and skips dispatch
//! entirely for states that carry none.

use crate::errors::BoxedError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classifies whether a state owns a running backing resource.
///
/// Inactive states ("not initialized", "deinitialized") hold no resource
/// manager; active states ("initializing", "initialized", "deinitializing")
/// own the resource manager of their activation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateFamily {
    /// No backing resource is running.
    Inactive,
    /// A backing resource is running (or being started/stopped).
    Active,
}

impl StateFamily {
    /// Returns `true` for the active family.
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Hook invoked on the outgoing state after a transition is decided but
/// before the new state becomes visible.
///
/// The engine awaits completion before publishing, so teardown performed here
/// (stopping a resource monitor, closing a connection) can never race with a
/// successor state's initialization.
#[async_trait]
pub trait DetachHook<S>: Send + Sync {
    /// Runs with the incoming state as argument. A failure aborts the
    /// transition: nothing is published and the outgoing state stays current.
    async fn before_detach(&self, next: &S) -> Result<(), BoxedError>;
}

/// Hook invoked on the incoming state immediately after it becomes visible.
///
/// By the time this runs, `current()` and every observer already see the new
/// state, so setup performed here (starting a resource monitor) happens only
/// once the state is the state of record. A failure is reported to the
/// transition's initiator but cannot roll the publish back.
#[async_trait]
pub trait AttachHook<S>: Send + Sync {
    /// Runs with the outgoing state as argument.
    async fn after_attach(&self, previous: &S) -> Result<(), BoxedError>;
}

/// A state that can live in a [`StateRepository`](crate::StateRepository).
///
/// Implementations are cheap to clone; states that own a resource manager
/// hold it behind an `Arc` so clones share the single manager of the
/// activation cycle.
pub trait RepositoryState: Clone + Send + Sync + fmt::Debug + 'static {
    /// The family this state belongs to.
    fn family(&self) -> StateFamily;

    /// A short static label for diagnostics and error reporting.
    fn label(&self) -> &'static str;

    /// The before-detach capability, if this state has one.
    fn detach_hook(&self) -> Option<&dyn DetachHook<Self>> {
        None
    }

    /// The after-attach capability, if this state has one.
    fn attach_hook(&self) -> Option<&dyn AttachHook<Self>> {
        None
    }
}
