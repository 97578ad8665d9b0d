//! Permission status as a cold state machine.
//!
//! The backing resource is an [`IntervalPoller`] sampling a permission
//! authority; a denied permission is a domain state like any other, not an
//! engine error. The in-memory [`PermissionAuthority`] stands in for a
//! platform permission service and can be flipped by demo or test code.

use async_trait::async_trait;
use coldstate::{
    ActivationId, AttachHook, BoxedError, ColdStateRepository, Decision, DetachHook, EventSink,
    RepositoryName, RepositoryState, ResourceMonitor, StateFamily, StateObserver,
    TransitionResult,
};
use coldstate_monitors::{IntervalPoller, Probe};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tracing::warn;

/// The status a permission authority reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionStatus {
    /// The user has not been asked yet.
    NotDetermined,
    /// The permission is granted.
    Granted,
    /// The permission is denied.
    Denied,
}

/// An in-memory, settable permission source.
#[derive(Debug, Clone)]
pub struct PermissionAuthority {
    status: Arc<RwLock<PermissionStatus>>,
}

impl PermissionAuthority {
    /// Creates an authority reporting [`PermissionStatus::NotDetermined`].
    pub fn new() -> Self {
        Self {
            status: Arc::new(RwLock::new(PermissionStatus::NotDetermined)),
        }
    }

    /// Sets the reported status.
    pub fn set(&self, status: PermissionStatus) {
        *self.status.write().expect("RwLock poisoned") = status;
    }

    /// The currently reported status.
    pub fn get(&self) -> PermissionStatus {
        *self.status.read().expect("RwLock poisoned")
    }
}

impl Default for PermissionAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe<PermissionStatus> for PermissionAuthority {
    async fn sample(&self) -> PermissionStatus {
        self.get()
    }
}

/// Lifecycle of the permission watching feature.
#[derive(Debug, Clone)]
pub enum PermissionState {
    /// No observer has ever attached.
    NotInitialized,
    /// The poller is starting; no sample yet.
    Initializing {
        /// The activation cycle that created the poller.
        activation: ActivationId,
        /// The cycle's poller.
        monitor: Arc<dyn ResourceMonitor>,
    },
    /// The poller is running and the last sampled status is known.
    Known {
        /// The activation cycle that created the poller.
        activation: ActivationId,
        /// The cycle's poller.
        monitor: Arc<dyn ResourceMonitor>,
        /// The most recently sampled status.
        status: PermissionStatus,
    },
    /// The poller has been stopped; teardown is completing.
    Deinitializing {
        /// The activation cycle being torn down.
        activation: ActivationId,
    },
    /// The last observer detached and teardown completed.
    Deinitialized,
}

impl PermissionState {
    /// The sampled status, once one is known.
    pub const fn status(&self) -> Option<PermissionStatus> {
        match self {
            Self::Known { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl RepositoryState for PermissionState {
    fn family(&self) -> StateFamily {
        match self {
            Self::NotInitialized | Self::Deinitialized => StateFamily::Inactive,
            _ => StateFamily::Active,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not-initialized",
            Self::Initializing { .. } => "initializing",
            Self::Known { .. } => "known",
            Self::Deinitializing { .. } => "deinitializing",
            Self::Deinitialized => "deinitialized",
        }
    }

    fn detach_hook(&self) -> Option<&dyn DetachHook<Self>> {
        match self {
            Self::Initializing { .. } | Self::Known { .. } => Some(self),
            _ => None,
        }
    }

    fn attach_hook(&self) -> Option<&dyn AttachHook<Self>> {
        match self {
            Self::Initializing { .. } => Some(self),
            _ => None,
        }
    }
}

#[async_trait]
impl DetachHook<Self> for PermissionState {
    async fn before_detach(&self, next: &Self) -> Result<(), BoxedError> {
        if let (
            Self::Initializing { monitor, .. } | Self::Known { monitor, .. },
            Self::Deinitializing { .. },
        ) = (self, next)
        {
            monitor.stop_monitoring().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AttachHook<Self> for PermissionState {
    async fn after_attach(&self, _previous: &Self) -> Result<(), BoxedError> {
        if let Self::Initializing { monitor, .. } = self {
            monitor.start_monitoring().await?;
        }
        Ok(())
    }
}

/// Funnels sampled statuses into the repository.
struct StatusSink {
    feature: Weak<PermissionWatcher>,
}

#[async_trait]
impl EventSink<PermissionStatus> for StatusSink {
    async fn deliver(&self, status: PermissionStatus) {
        let Some(feature) = self.feature.upgrade() else {
            return;
        };
        let result = feature
            .repo
            .push_change(move |state: &PermissionState| match state {
                PermissionState::Initializing {
                    activation,
                    monitor,
                }
                | PermissionState::Known {
                    activation,
                    monitor,
                    ..
                } => Ok(Decision::advance_to(PermissionState::Known {
                    activation: *activation,
                    monitor: Arc::clone(monitor),
                    status,
                })),
                _ => Ok(Decision::Remain),
            });
        if let Err(err) = result {
            warn!(error = %err, "dropping permission sample, repository closed");
        }
    }
}

/// The permission watching feature module.
pub struct PermissionWatcher {
    repo: ColdStateRepository<PermissionState>,
    authority: PermissionAuthority,
}

impl PermissionWatcher {
    /// Creates the feature polling `authority` at the default interval.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(authority: PermissionAuthority) -> Arc<Self> {
        Self::with_poll_interval(authority, Duration::from_millis(100))
    }

    /// Creates the feature polling `authority` at the given interval.
    pub fn with_poll_interval(authority: PermissionAuthority, poll_interval: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let init_weak = weak.clone();
            let probe = authority.clone();
            let repo = ColdStateRepository::new(
                RepositoryName::try_new("permission-status")
                    .expect("literal repository name is valid"),
                || PermissionState::NotInitialized,
                move |state: &PermissionState| match state {
                    PermissionState::NotInitialized | PermissionState::Deinitialized => {
                        let Some(feature) = init_weak.upgrade() else {
                            return Ok(Decision::Remain);
                        };
                        let probe = probe.clone();
                        Ok(Decision::advance(async move {
                            let sink = Arc::new(StatusSink {
                                feature: Arc::downgrade(&feature),
                            });
                            let poller = IntervalPoller::new(
                                Arc::new(probe) as Arc<dyn Probe<PermissionStatus>>,
                                sink,
                            )
                            .with_poll_interval(poll_interval);
                            Ok(PermissionState::Initializing {
                                activation: ActivationId::new(),
                                monitor: Arc::new(poller),
                            })
                        }))
                    }
                    _ => Ok(Decision::Remain),
                },
                |state: &PermissionState| match state {
                    PermissionState::Initializing { activation, .. }
                    | PermissionState::Known { activation, .. } => Ok(Decision::advance_to(
                        PermissionState::Deinitializing {
                            activation: *activation,
                        },
                    )),
                    PermissionState::Deinitializing { .. } => {
                        Ok(Decision::advance_to(PermissionState::Deinitialized))
                    }
                    _ => Ok(Decision::Remain),
                },
            );
            Self { repo, authority }
        })
    }

    /// Attaches an observer, cold-starting the poller if it is the first.
    pub async fn subscribe(&self) -> TransitionResult<StateObserver<PermissionState>> {
        self.repo.subscribe().await
    }

    /// The current permission state.
    pub fn current(&self) -> PermissionState {
        self.repo.current()
    }

    /// The authority being polled.
    pub const fn authority(&self) -> &PermissionAuthority {
        &self.authority
    }

    /// The underlying cold repository.
    pub const fn repository(&self) -> &ColdStateRepository<PermissionState> {
        &self.repo
    }
}
