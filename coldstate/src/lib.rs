//! `ColdState` - subscriber-driven cold state machine engine.
//!
//! This library implements a cold, subscriber-driven finite-state-machine
//! container: a generic mechanism that lazily starts an underlying resource
//! the moment the first observer appears, keeps a single authoritative
//! current state, serializes all state transitions against concurrent
//! callers, runs ordered lifecycle hooks around each transition, and tears
//! the resource down exactly when the last observer disappears.
//!
//! # Core pieces
//!
//! - [`StateRepository`] - one authoritative state, a replayable multicast
//!   stream of publishes, and an atomic "take current state and decide +
//!   apply next state" operation serviced by a single serialized worker.
//! - [`ColdStateRepository`] - the subscriber-driven specialization: the
//!   0 -> 1 crossing fires the feature's initialize transition, the 1 -> 0
//!   crossing drives its deinitialize transition to quiescence.
//! - [`RepositoryState`] - the trait feature state enums implement, with
//!   optional [`DetachHook`]/[`AttachHook`] capabilities for ordered
//!   teardown and setup around each publish.
//! - [`ResourceMonitor`] - the narrow interface to the thing actually being
//!   started and stopped, with events pushed back through an [`EventSink`].
//!
//! # Example
//!
//! ```rust,ignore
//! let repo = ColdStateRepository::new(
//!     RepositoryName::try_new("network-reachability")?,
//!     || NetworkState::NotInitialized,
//!     initialize_transition,
//!     deinitialize_transition,
//! );
//!
//! let mut observer = repo.subscribe().await?;   // cold-starts the monitor
//! let state = observer.wait_for(NetworkState::is_available).await?;
//! observer.unsubscribe().await?;                // cold-stops the monitor
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cold;
pub mod errors;
pub mod monitor;
pub mod repository;
pub mod state;
pub mod transition;
pub mod types;

pub use cold::ColdStateRepository;
pub use errors::{BoxedError, MonitorError, MonitorResult, TransitionError, TransitionResult};
pub use monitor::{EventSink, ResourceMonitor};
pub use repository::{StateObserver, StateRepository};
pub use state::{AttachHook, DetachHook, RepositoryState, StateFamily};
pub use transition::{Decision, NextState, Outcome, Published, SharedTransition};
pub use types::{ActivationId, RepositoryName, StateRevision, Timestamp};
