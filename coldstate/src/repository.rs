//! The serialized state repository.
//!
//! A [`StateRepository`] owns the single authoritative current state of a
//! feature, exposes it as a multicast, replayable stream to any number of
//! observers, and funnels every mutation through one atomic
//! "take current state, decide, apply" operation.
//!
//! Exclusivity is realized as a single-owner worker task: callers of any
//! concurrency submit transition commands to an unbounded queue and the
//! worker drains them strictly in arrival order. The decision, the producer,
//! and both lifecycle hooks all run inside the worker, so every suspension
//! point of a transition happens while no other transition can proceed - and
//! no OS thread blocks while one is suspended.

use crate::cold::ColdLifecycle;
use crate::errors::{BoxedError, TransitionError, TransitionResult};
use crate::state::RepositoryState;
use crate::transition::{Decision, Outcome, Published, SharedTransition};
use crate::types::RepositoryName;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, warn};

/// Maximum applications of the deinitialize transition in one cold-stop
/// before it is reported as stalled.
const MAX_TEARDOWN_HOPS: usize = 8;

/// Boxed one-shot decision evaluated by the worker against the current state.
pub(crate) type BoxedDecision<S> =
    Box<dyn FnOnce(&S) -> Result<Decision<S>, BoxedError> + Send>;

/// A command queued for the transition worker.
enum Command<S: RepositoryState> {
    /// Apply a single transition request.
    Mutate {
        decide: BoxedDecision<S>,
        reply: Option<oneshot::Sender<TransitionResult<Outcome<S>>>>,
    },
    /// Apply the deinitialize transition until the machine reaches an
    /// inactive-family state. Runs as one command so a queued reinitialize
    /// can never interleave with a half-finished teardown.
    ColdStop {
        transition: SharedTransition<S>,
        reply: Option<oneshot::Sender<TransitionResult<()>>>,
    },
}

/// Shared internals behind a repository and all of its observers.
pub(crate) struct RepositoryCore<S: RepositoryState> {
    name: RepositoryName,
    commands: mpsc::UnboundedSender<Command<S>>,
    watch_rx: watch::Receiver<Published<S>>,
    subscribers: AtomicUsize,
}

impl<S: RepositoryState> RepositoryCore<S> {
    pub(crate) fn name(&self) -> &RepositoryName {
        &self.name
    }

    pub(crate) fn published(&self) -> Published<S> {
        self.watch_rx.borrow().clone()
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Acquire)
    }

    /// Registers an observer and returns it together with the previous
    /// subscriber count, so cold repositories can detect the 0 -> 1 crossing.
    pub(crate) fn register_observer(
        self: &Arc<Self>,
        lifecycle: Option<Arc<ColdLifecycle<S>>>,
    ) -> (StateObserver<S>, usize) {
        let previous = self.subscribers.fetch_add(1, Ordering::AcqRel);
        let mut rx = self.watch_rx.clone();
        // Mark the value installed at subscribe time as seen: the observer
        // reads it through current(), and changed() reports only publishes
        // that happen strictly after attachment.
        let _ = rx.borrow_and_update();
        let observer = StateObserver {
            core: Arc::clone(self),
            lifecycle,
            rx,
            released: false,
        };
        (observer, previous)
    }

    /// Decrements the subscriber count, reporting whether it crossed 1 -> 0.
    pub(crate) fn deregister(&self) -> bool {
        self.subscribers.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(crate) async fn submit_mutation(
        &self,
        decide: BoxedDecision<S>,
    ) -> TransitionResult<Outcome<S>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Mutate {
                decide,
                reply: Some(reply_tx),
            })
            .map_err(|_| TransitionError::RepositoryClosed(self.name.clone()))?;
        reply_rx
            .await
            .map_err(|_| TransitionError::RepositoryClosed(self.name.clone()))?
    }

    pub(crate) fn push_mutation(&self, decide: BoxedDecision<S>) -> TransitionResult<()> {
        self.commands
            .send(Command::Mutate {
                decide,
                reply: None,
            })
            .map_err(|_| TransitionError::RepositoryClosed(self.name.clone()))
    }

    pub(crate) async fn submit_cold_stop(
        &self,
        transition: SharedTransition<S>,
    ) -> TransitionResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::ColdStop {
                transition,
                reply: Some(reply_tx),
            })
            .map_err(|_| TransitionError::RepositoryClosed(self.name.clone()))?;
        reply_rx
            .await
            .map_err(|_| TransitionError::RepositoryClosed(self.name.clone()))?
    }

    pub(crate) fn push_cold_stop(&self, transition: SharedTransition<S>) {
        let result = self.commands.send(Command::ColdStop {
            transition,
            reply: None,
        });
        if result.is_err() {
            // Worker gone: the repository itself was dropped, taking the
            // queue and the published state with it.
            debug!(repository = %self.name, "cold-stop skipped, repository closed");
        }
    }
}

/// A repository of one authoritative state with serialized transitions.
///
/// Cloning a repository is cheap and yields a handle to the same underlying
/// state, queue, and subscriber count.
#[derive(Clone)]
pub struct StateRepository<S: RepositoryState> {
    core: Arc<RepositoryCore<S>>,
}

impl<S: RepositoryState> StateRepository<S> {
    /// Creates a repository holding `initial` and spawns its transition
    /// worker on the ambient Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime. Use
    /// [`with_runtime`](Self::with_runtime) to target an explicit handle.
    pub fn new(name: RepositoryName, initial: S) -> Self {
        Self::with_runtime(name, initial, tokio::runtime::Handle::current())
    }

    /// Creates a repository whose worker (and any drop-path teardown) runs
    /// on the given runtime handle.
    pub fn with_runtime(
        name: RepositoryName,
        initial: S,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        let (watch_tx, watch_rx) = watch::channel(Published::initial(initial));
        let (commands, command_rx) = mpsc::unbounded_channel();
        runtime.spawn(worker(name.clone(), watch_tx, command_rx));
        Self {
            core: Arc::new(RepositoryCore {
                name,
                commands,
                watch_rx,
                subscribers: AtomicUsize::new(0),
            }),
        }
    }

    /// The repository's name.
    pub fn name(&self) -> &RepositoryName {
        self.core.name()
    }

    /// Returns the presently installed state. Never blocks.
    pub fn current(&self) -> S {
        self.core.watch_rx.borrow().state.clone()
    }

    /// Returns the presently installed state together with its revision and
    /// publish time. Never blocks.
    pub fn published(&self) -> Published<S> {
        self.core.published()
    }

    /// The revision of the presently installed state.
    pub fn revision(&self) -> crate::types::StateRevision {
        self.core.watch_rx.borrow().revision
    }

    /// Number of observers currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }

    /// Registers an observer of the state stream.
    ///
    /// The observer immediately holds the latest published record
    /// (replay-of-one): [`StateObserver::current`] returns the state that was
    /// authoritative at subscribe time, and later publishes arrive through
    /// [`StateObserver::changed`].
    pub fn subscribe(&self) -> StateObserver<S> {
        let (observer, _previous) = self.core.register_observer(None);
        observer
    }

    /// Atomically takes the current state, decides, and applies the next
    /// state, awaiting the result.
    ///
    /// At most one transition is in flight per repository; concurrent calls
    /// queue and are serviced in arrival order. The decision runs against the
    /// state as it is when the transition's turn comes, not as it was when
    /// the call was made - which is what rules out lost updates.
    pub async fn take_and_change<D>(&self, decide: D) -> TransitionResult<Outcome<S>>
    where
        D: FnOnce(&S) -> Result<Decision<S>, BoxedError> + Send + 'static,
    {
        self.core.submit_mutation(Box::new(decide)).await
    }

    /// Queues a transition without awaiting its outcome.
    ///
    /// Intended for resource-monitor event funnels: delivery callbacks must
    /// not wait on the transition worker, or a monitor being stopped from a
    /// before-detach hook could deadlock against its own pending events.
    /// Failures of a pushed transition are logged by the worker.
    pub fn push_change<D>(&self, decide: D) -> TransitionResult<()>
    where
        D: FnOnce(&S) -> Result<Decision<S>, BoxedError> + Send + 'static,
    {
        self.core.push_mutation(Box::new(decide))
    }

    pub(crate) fn core(&self) -> &Arc<RepositoryCore<S>> {
        &self.core
    }
}

impl<S: RepositoryState> std::fmt::Debug for StateRepository<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateRepository")
            .field("name", &self.core.name)
            .field("subscribers", &self.core.subscriber_count())
            .field("revision", &self.core.watch_rx.borrow().revision)
            .finish_non_exhaustive()
    }
}

/// A registered observer of a repository's state stream.
///
/// Dropping an observer deregisters it; on a cold repository, dropping the
/// last observer queues the deinitialize teardown. Prefer the explicit
/// [`unsubscribe`](Self::unsubscribe) where teardown errors matter, since the
/// drop path can only log them.
pub struct StateObserver<S: RepositoryState> {
    core: Arc<RepositoryCore<S>>,
    lifecycle: Option<Arc<ColdLifecycle<S>>>,
    rx: watch::Receiver<Published<S>>,
    released: bool,
}

impl<S: RepositoryState> StateObserver<S> {
    /// The state that is authoritative right now. Never blocks.
    pub fn current(&self) -> S {
        self.rx.borrow().state.clone()
    }

    /// The current published record (state, revision, publish time).
    pub fn published(&self) -> Published<S> {
        self.rx.borrow().clone()
    }

    /// Waits for the next publish after the last one this observer saw and
    /// returns it.
    ///
    /// Observers conflate: if several transitions publish between calls, the
    /// latest record is returned and the intermediate ones are skipped.
    pub async fn changed(&mut self) -> TransitionResult<Published<S>> {
        self.rx
            .changed()
            .await
            .map_err(|_| TransitionError::RepositoryClosed(self.core.name().clone()))?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Waits until the current state satisfies `predicate`, checking the
    /// state installed right now first.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> TransitionResult<S>
    where
        F: FnMut(&S) -> bool,
    {
        let published = self
            .rx
            .wait_for(|published| predicate(&published.state))
            .await
            .map_err(|_| TransitionError::RepositoryClosed(self.core.name().clone()))?;
        Ok(published.state.clone())
    }

    /// Deregisters this observer.
    ///
    /// On a cold repository, the final unsubscribe awaits the deinitialize
    /// teardown and surfaces its errors to this caller.
    pub async fn unsubscribe(mut self) -> TransitionResult<()> {
        self.released = true;
        let crossed_to_zero = self.core.deregister();
        if crossed_to_zero {
            if let Some(lifecycle) = self.lifecycle.clone() {
                return self.core.submit_cold_stop(lifecycle.deinitialize()).await;
            }
        }
        Ok(())
    }
}

impl<S: RepositoryState> Drop for StateObserver<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let crossed_to_zero = self.core.deregister();
        if crossed_to_zero {
            if let Some(lifecycle) = &self.lifecycle {
                warn!(
                    repository = %self.core.name(),
                    "last observer dropped without unsubscribe, queueing teardown"
                );
                self.core.push_cold_stop(lifecycle.deinitialize());
            }
        }
    }
}

impl<S: RepositoryState> std::fmt::Debug for StateObserver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateObserver")
            .field("repository", &self.core.name())
            .field("cold", &self.lifecycle.is_some())
            .finish_non_exhaustive()
    }
}

/// The single-owner transition worker: drains commands strictly in arrival
/// order and applies each one to completion before looking at the next.
async fn worker<S: RepositoryState>(
    name: RepositoryName,
    watch_tx: watch::Sender<Published<S>>,
    mut commands: mpsc::UnboundedReceiver<Command<S>>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Mutate { decide, reply } => {
                let result = apply_transition(&name, &watch_tx, decide).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            error!(repository = %name, error = %err, "pushed transition failed");
                        }
                    }
                }
            }
            Command::ColdStop { transition, reply } => {
                let result = drive_to_inactive(&name, &watch_tx, &transition).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            error!(repository = %name, error = %err, "drop-path teardown failed");
                        }
                    }
                }
            }
        }
    }
    debug!(repository = %name, "transition worker stopped");
}

/// One atomic transition: read, decide, produce, detach hook, publish,
/// attach hook. Failure leaves the repository on the old state unless the
/// after-attach hook is the phase that failed.
async fn apply_transition<S: RepositoryState>(
    name: &RepositoryName,
    watch_tx: &watch::Sender<Published<S>>,
    decide: BoxedDecision<S>,
) -> TransitionResult<Outcome<S>> {
    let current = watch_tx.borrow().state.clone();

    let decision = decide(&current).map_err(TransitionError::Decision)?;
    let producer = match decision {
        Decision::Remain => return Ok(Outcome::Remained),
        Decision::Advance(producer) => producer,
    };

    let next = producer.await.map_err(TransitionError::Produce)?;

    if let Some(hook) = current.detach_hook() {
        hook.before_detach(&next)
            .await
            .map_err(|source| TransitionError::BeforeDetach {
                state: current.label(),
                source,
            })?;
    }

    let revision = watch_tx.borrow().revision.next();
    watch_tx.send_replace(Published::new(revision, next.clone()));
    debug!(
        repository = %name,
        from = current.label(),
        to = next.label(),
        revision = %revision,
        "state transition published"
    );

    if let Some(hook) = next.attach_hook() {
        hook.after_attach(&current)
            .await
            .map_err(|source| TransitionError::AfterAttach {
                state: next.label(),
                source,
            })?;
    }

    Ok(Outcome::Changed {
        from: current,
        to: next,
    })
}

/// Applies the deinitialize transition until the machine reports an
/// inactive family, bounded by [`MAX_TEARDOWN_HOPS`].
async fn drive_to_inactive<S: RepositoryState>(
    name: &RepositoryName,
    watch_tx: &watch::Sender<Published<S>>,
    transition: &SharedTransition<S>,
) -> TransitionResult<()> {
    for _ in 0..MAX_TEARDOWN_HOPS {
        if !watch_tx.borrow().state.family().is_active() {
            return Ok(());
        }
        let step = Arc::clone(transition);
        let outcome =
            apply_transition(name, watch_tx, Box::new(move |state| step(state))).await?;
        if !outcome.changed() {
            let label = watch_tx.borrow().state.label();
            warn!(
                repository = %name,
                state = label,
                "deinitialize transition remained on an active state"
            );
            return Ok(());
        }
    }
    if watch_tx.borrow().state.family().is_active() {
        return Err(TransitionError::TeardownIncomplete {
            hops: MAX_TEARDOWN_HOPS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StateFamily;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum CounterState {
        Idle,
        Counting(u64),
    }

    impl RepositoryState for CounterState {
        fn family(&self) -> StateFamily {
            match self {
                Self::Idle => StateFamily::Inactive,
                Self::Counting(_) => StateFamily::Active,
            }
        }

        fn label(&self) -> &'static str {
            match self {
                Self::Idle => "idle",
                Self::Counting(_) => "counting",
            }
        }
    }

    fn repository() -> StateRepository<CounterState> {
        StateRepository::new(
            RepositoryName::try_new("counter").unwrap(),
            CounterState::Idle,
        )
    }

    #[tokio::test]
    async fn current_returns_the_initial_state() {
        let repo = repository();
        assert_eq!(repo.current(), CounterState::Idle);
        assert_eq!(repo.published().revision, crate::types::StateRevision::initial());
        assert_eq!(repo.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn take_and_change_publishes_and_bumps_revision() {
        let repo = repository();
        let outcome = repo
            .take_and_change(|_| Ok(Decision::advance_to(CounterState::Counting(1))))
            .await
            .unwrap();
        assert_eq!(outcome.new_state(), Some(&CounterState::Counting(1)));
        assert_eq!(repo.current(), CounterState::Counting(1));

        let revision: u64 = repo.published().revision.into();
        assert_eq!(revision, 1);
    }

    #[tokio::test]
    async fn remain_changes_nothing() {
        let repo = repository();
        let before = repo.published().revision;
        let outcome = repo.take_and_change(|_| Ok(Decision::Remain)).await.unwrap();
        assert!(!outcome.changed());
        assert_eq!(repo.published().revision, before);
        assert_eq!(repo.current(), CounterState::Idle);
    }

    #[tokio::test]
    async fn decision_sees_the_installed_state() {
        let repo = repository();
        repo.take_and_change(|_| Ok(Decision::advance_to(CounterState::Counting(3))))
            .await
            .unwrap();

        let outcome = repo
            .take_and_change(|state| {
                let next = match state {
                    CounterState::Counting(n) => CounterState::Counting(n + 1),
                    CounterState::Idle => CounterState::Counting(1),
                };
                Ok(Decision::advance_to(next))
            })
            .await
            .unwrap();
        assert_eq!(outcome.new_state(), Some(&CounterState::Counting(4)));
    }

    #[tokio::test]
    async fn decision_failure_keeps_the_old_state() {
        let repo = repository();
        let err = repo
            .take_and_change(|_: &CounterState| Err::<Decision<CounterState>, _>("nope".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::Decision(_)));
        assert!(err.left_state_unchanged());
        assert_eq!(repo.current(), CounterState::Idle);
    }

    #[tokio::test]
    async fn producer_failure_keeps_the_old_state() {
        let repo = repository();
        let err = repo
            .take_and_change(|_| {
                Ok(Decision::advance(async {
                    Err::<CounterState, _>("producer exploded".into())
                }))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::Produce(_)));
        assert_eq!(repo.current(), CounterState::Idle);

        let revision: u64 = repo.published().revision.into();
        assert_eq!(revision, 0);
    }

    #[tokio::test]
    async fn observer_replays_the_latest_state() {
        let repo = repository();
        repo.take_and_change(|_| Ok(Decision::advance_to(CounterState::Counting(9))))
            .await
            .unwrap();

        let observer = repo.subscribe();
        assert_eq!(repo.subscriber_count(), 1);
        assert_eq!(observer.current(), CounterState::Counting(9));

        observer.unsubscribe().await.unwrap();
        assert_eq!(repo.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn observer_changed_reports_later_publishes_only() {
        let repo = repository();
        repo.take_and_change(|_| Ok(Decision::advance_to(CounterState::Counting(1))))
            .await
            .unwrap();

        let mut observer = repo.subscribe();
        let waiter = tokio::spawn(async move { observer.changed().await.unwrap() });

        repo.take_and_change(|_| Ok(Decision::advance_to(CounterState::Counting(2))))
            .await
            .unwrap();

        let published = waiter.await.unwrap();
        assert_eq!(published.state, CounterState::Counting(2));
    }

    #[tokio::test]
    async fn push_change_applies_without_awaiting() {
        let repo = repository();
        let mut observer = repo.subscribe();
        repo.push_change(|_| Ok(Decision::advance_to(CounterState::Counting(5))))
            .unwrap();

        let state = observer
            .wait_for(|state| matches!(state, CounterState::Counting(5)))
            .await
            .unwrap();
        assert_eq!(state, CounterState::Counting(5));
    }

    #[tokio::test]
    async fn dropping_an_observer_deregisters_it() {
        let repo = repository();
        let observer = repo.subscribe();
        assert_eq!(repo.subscriber_count(), 1);
        drop(observer);
        assert_eq!(repo.subscriber_count(), 0);
    }
}
