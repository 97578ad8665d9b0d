//! The cold, subscriber-driven repository specialization.
//!
//! A [`ColdStateRepository`] keeps its backing resource alive only while at
//! least one observer is attached. The subscriber count crossing 0 -> 1
//! fires the feature's initialize transition (where the resource monitor is
//! created and told to start); the crossing 1 -> 0 fires the deinitialize
//! transition (where the monitor is told to stop). Intermediate crossings
//! never touch the lifecycle.
//!
//! Both lifecycle transitions flow through the same serialized worker as
//! every other transition, so a reinitialize can only ever observe a fully
//! deinitialized machine, never one whose teardown is still in flight.

use crate::errors::{BoxedError, TransitionResult};
use crate::repository::{StateObserver, StateRepository};
use crate::state::RepositoryState;
use crate::transition::{Decision, Outcome, Published, SharedTransition};
use crate::types::RepositoryName;
use std::sync::Arc;
use tracing::instrument;

/// The pair of subscriber-count transitions configured at construction.
pub(crate) struct ColdLifecycle<S: RepositoryState> {
    initialize: SharedTransition<S>,
    deinitialize: SharedTransition<S>,
}

impl<S: RepositoryState> ColdLifecycle<S> {
    pub(crate) fn initialize(&self) -> SharedTransition<S> {
        Arc::clone(&self.initialize)
    }

    pub(crate) fn deinitialize(&self) -> SharedTransition<S> {
        Arc::clone(&self.deinitialize)
    }
}

/// A state repository whose backing resource is started by the first
/// observer and stopped by the last.
///
/// Constructed from the feature's canonical not-initialized state factory
/// and its two lifecycle transitions:
///
/// ```text
/// NotInitialized --(0->1)--> Initializing --(resource ready)--> Initialized(v)
/// Initialized(v) --(event)--> Initialized(v')
/// Initialized(v) --(1->0)--> Deinitializing --(teardown)--> Deinitialized
/// Deinitialized  --(0->1)--> Initializing
/// ```
///
/// Cloning yields a handle to the same repository.
#[derive(Clone)]
pub struct ColdStateRepository<S: RepositoryState> {
    base: StateRepository<S>,
    lifecycle: Arc<ColdLifecycle<S>>,
}

impl<S: RepositoryState> ColdStateRepository<S> {
    /// Creates a cold repository on the ambient Tokio runtime.
    ///
    /// `not_initialized` builds the canonical initial state; `initialize`
    /// and `deinitialize` are the 0 -> 1 and 1 -> 0 transitions.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime. Use
    /// [`with_runtime`](Self::with_runtime) to target an explicit handle.
    pub fn new<F, I, D>(name: RepositoryName, not_initialized: F, initialize: I, deinitialize: D) -> Self
    where
        F: FnOnce() -> S,
        I: Fn(&S) -> Result<Decision<S>, BoxedError> + Send + Sync + 'static,
        D: Fn(&S) -> Result<Decision<S>, BoxedError> + Send + Sync + 'static,
    {
        Self::with_runtime(
            name,
            not_initialized,
            initialize,
            deinitialize,
            tokio::runtime::Handle::current(),
        )
    }

    /// Creates a cold repository whose worker runs on the given runtime
    /// handle (the execution context for every transition suspension point).
    pub fn with_runtime<F, I, D>(
        name: RepositoryName,
        not_initialized: F,
        initialize: I,
        deinitialize: D,
        runtime: tokio::runtime::Handle,
    ) -> Self
    where
        F: FnOnce() -> S,
        I: Fn(&S) -> Result<Decision<S>, BoxedError> + Send + Sync + 'static,
        D: Fn(&S) -> Result<Decision<S>, BoxedError> + Send + Sync + 'static,
    {
        Self {
            base: StateRepository::with_runtime(name, not_initialized(), runtime),
            lifecycle: Arc::new(ColdLifecycle {
                initialize: Arc::new(initialize),
                deinitialize: Arc::new(deinitialize),
            }),
        }
    }

    /// The repository's name.
    pub fn name(&self) -> &RepositoryName {
        self.base.name()
    }

    /// Returns the presently installed state. Never blocks.
    pub fn current(&self) -> S {
        self.base.current()
    }

    /// Returns the current published record. Never blocks.
    pub fn published(&self) -> Published<S> {
        self.base.published()
    }

    /// The revision of the presently installed state.
    pub fn revision(&self) -> crate::types::StateRevision {
        self.base.revision()
    }

    /// Number of observers currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.base.subscriber_count()
    }

    /// Registers an observer, cold-starting the repository if it is the
    /// first one.
    ///
    /// The 0 -> 1 crossing submits the initialize transition and awaits its
    /// completion before returning, so a successful subscribe means the
    /// machine has left its inactive state (and an initialize failure is
    /// returned to the subscriber that triggered it, with the registration
    /// rolled back). Observers beyond the first attach without touching the
    /// lifecycle.
    #[instrument(skip(self), fields(repository = %self.base.name()))]
    pub async fn subscribe(&self) -> TransitionResult<StateObserver<S>> {
        let (observer, previous) = self
            .base
            .core()
            .register_observer(Some(Arc::clone(&self.lifecycle)));
        if previous == 0 {
            let initialize = self.lifecycle.initialize();
            let started = self
                .base
                .core()
                .submit_mutation(Box::new(move |state: &S| initialize(state)))
                .await;
            if let Err(err) = started {
                // Dropping the registration re-crosses 1 -> 0; the queued
                // teardown is a no-op unless the failed initialize already
                // published an active state.
                drop(observer);
                return Err(err);
            }
        }
        Ok(observer)
    }

    /// Atomically takes the current state, decides, and applies the next
    /// state. This is the entry point resource monitors push their raw
    /// events through.
    pub async fn take_and_change<D>(&self, decide: D) -> TransitionResult<Outcome<S>>
    where
        D: FnOnce(&S) -> Result<Decision<S>, BoxedError> + Send + 'static,
    {
        self.base.take_and_change(decide).await
    }

    /// Queues a transition without awaiting its outcome. See
    /// [`StateRepository::push_change`].
    pub fn push_change<D>(&self, decide: D) -> TransitionResult<()>
    where
        D: FnOnce(&S) -> Result<Decision<S>, BoxedError> + Send + 'static,
    {
        self.base.push_change(decide)
    }
}

impl<S: RepositoryState> std::fmt::Debug for ColdStateRepository<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColdStateRepository")
            .field("name", self.base.name())
            .field("subscribers", &self.base.subscriber_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateFamily;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum LampState {
        Off,
        Lit,
        Cooling,
        Dark,
    }

    impl RepositoryState for LampState {
        fn family(&self) -> StateFamily {
            match self {
                Self::Off | Self::Dark => StateFamily::Inactive,
                Self::Lit | Self::Cooling => StateFamily::Active,
            }
        }

        fn label(&self) -> &'static str {
            match self {
                Self::Off => "off",
                Self::Lit => "lit",
                Self::Cooling => "cooling",
                Self::Dark => "dark",
            }
        }
    }

    struct Lamp {
        repo: ColdStateRepository<LampState>,
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    fn lamp() -> Lamp {
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let init_starts = Arc::clone(&starts);
        let deinit_stops = Arc::clone(&stops);
        let repo = ColdStateRepository::new(
            RepositoryName::try_new("lamp").unwrap(),
            || LampState::Off,
            move |state: &LampState| match state {
                LampState::Off | LampState::Dark => {
                    init_starts.fetch_add(1, Ordering::SeqCst);
                    Ok(Decision::advance_to(LampState::Lit))
                }
                _ => Ok(Decision::Remain),
            },
            move |state: &LampState| match state {
                LampState::Lit => Ok(Decision::advance_to(LampState::Cooling)),
                LampState::Cooling => {
                    deinit_stops.fetch_add(1, Ordering::SeqCst);
                    Ok(Decision::advance_to(LampState::Dark))
                }
                _ => Ok(Decision::Remain),
            },
        );
        Lamp { repo, starts, stops }
    }

    #[tokio::test]
    async fn first_subscriber_cold_starts() {
        let lamp = lamp();
        assert_eq!(lamp.repo.current(), LampState::Off);

        let observer = lamp.repo.subscribe().await.unwrap();
        assert_eq!(lamp.repo.current(), LampState::Lit);
        assert_eq!(lamp.starts.load(Ordering::SeqCst), 1);

        let second = lamp.repo.subscribe().await.unwrap();
        assert_eq!(lamp.starts.load(Ordering::SeqCst), 1);

        drop(observer);
        drop(second);
    }

    #[tokio::test]
    async fn last_unsubscribe_drives_teardown_to_inactive() {
        let lamp = lamp();
        let first = lamp.repo.subscribe().await.unwrap();
        let second = lamp.repo.subscribe().await.unwrap();

        first.unsubscribe().await.unwrap();
        assert_eq!(lamp.repo.current(), LampState::Lit);
        assert_eq!(lamp.stops.load(Ordering::SeqCst), 0);

        second.unsubscribe().await.unwrap();
        assert_eq!(lamp.repo.current(), LampState::Dark);
        assert_eq!(lamp.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reinitializes_from_deinitialized() {
        let lamp = lamp();
        let observer = lamp.repo.subscribe().await.unwrap();
        observer.unsubscribe().await.unwrap();
        assert_eq!(lamp.repo.current(), LampState::Dark);

        let observer = lamp.repo.subscribe().await.unwrap();
        assert_eq!(lamp.repo.current(), LampState::Lit);
        assert_eq!(lamp.starts.load(Ordering::SeqCst), 2);
        observer.unsubscribe().await.unwrap();
        assert_eq!(lamp.stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn initialize_failure_surfaces_to_the_subscriber() {
        let repo = ColdStateRepository::new(
            RepositoryName::try_new("broken-lamp").unwrap(),
            || LampState::Off,
            |_: &LampState| Err::<Decision<LampState>, _>("no bulb".into()),
            |_: &LampState| Ok(Decision::Remain),
        );

        let err = repo.subscribe().await.unwrap_err();
        assert!(matches!(err, crate::errors::TransitionError::Decision(_)));
        assert_eq!(repo.current(), LampState::Off);
        assert_eq!(repo.subscriber_count(), 0);

        // The next first subscriber retries the initialize.
        let err = repo.subscribe().await.unwrap_err();
        assert!(matches!(err, crate::errors::TransitionError::Decision(_)));
    }
}
