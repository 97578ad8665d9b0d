//! A Bluetooth-style device link as a cold state machine.
//!
//! Shows the initialized-value loop for a connection-oriented resource: the
//! session state is replaced on every link event (connect, drop, reconnect)
//! while the same activation cycle's monitor keeps running underneath.

use async_trait::async_trait;
use coldstate::{
    ActivationId, AttachHook, BoxedError, ColdStateRepository, Decision, DetachHook, EventSink,
    RepositoryName, RepositoryState, ResourceMonitor, StateFamily, StateObserver,
    TransitionResult,
};
use coldstate_monitors::{ScriptedFeed, ScriptedMonitor};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};
use tracing::warn;

/// Why a device link dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The peer closed the link.
    PeerTerminated,
    /// The link timed out.
    Timeout,
    /// The local side requested the disconnect.
    LocalRequest,
}

/// A raw event from the device stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// The link came up.
    Connected,
    /// The link went down.
    Disconnected {
        /// Why the link dropped.
        reason: DisconnectReason,
    },
}

/// Health of the link within a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkHealth {
    /// The link is up.
    Connected,
    /// The link dropped; the monitor may reconnect.
    Dropped {
        /// Why the link dropped.
        reason: DisconnectReason,
    },
}

/// Lifecycle of the device link feature.
#[derive(Debug, Clone)]
pub enum DeviceLinkState {
    /// No observer has ever attached.
    NotInitialized,
    /// The device monitor is starting.
    Initializing {
        /// The activation cycle that created the monitor.
        activation: ActivationId,
        /// The cycle's device monitor.
        monitor: Arc<dyn ResourceMonitor>,
    },
    /// A session is running with the given link health.
    Session {
        /// The activation cycle that created the monitor.
        activation: ActivationId,
        /// The cycle's device monitor.
        monitor: Arc<dyn ResourceMonitor>,
        /// Current link health.
        health: LinkHealth,
    },
    /// The monitor has been stopped; teardown is completing.
    Deinitializing {
        /// The activation cycle being torn down.
        activation: ActivationId,
    },
    /// The last observer detached and teardown completed.
    Deinitialized,
}

impl DeviceLinkState {
    /// The session's link health, if a session is running.
    pub const fn health(&self) -> Option<LinkHealth> {
        match self {
            Self::Session { health, .. } => Some(*health),
            _ => None,
        }
    }
}

impl RepositoryState for DeviceLinkState {
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
            Self::Session { .. } => "session",
            Self::Deinitializing { .. } => "deinitializing",
            Self::Deinitialized => "deinitialized",
        }
    }

    fn detach_hook(&self) -> Option<&dyn DetachHook<Self>> {
        match self {
            Self::Initializing { .. } | Self::Session { .. } => Some(self),
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
impl DetachHook<Self> for DeviceLinkState {
    async fn before_detach(&self, next: &Self) -> Result<(), BoxedError> {
        if let (
            Self::Initializing { monitor, .. } | Self::Session { monitor, .. },
            Self::Deinitializing { .. },
        ) = (self, next)
        {
            monitor.stop_monitoring().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AttachHook<Self> for DeviceLinkState {
    async fn after_attach(&self, _previous: &Self) -> Result<(), BoxedError> {
        if let Self::Initializing { monitor, .. } = self {
            monitor.start_monitoring().await?;
        }
        Ok(())
    }
}

struct DeviceSink {
    feature: Weak<DeviceLink>,
}

#[async_trait]
impl EventSink<DeviceEvent> for DeviceSink {
    async fn deliver(&self, event: DeviceEvent) {
        let Some(feature) = self.feature.upgrade() else {
            return;
        };
        let health = match event {
            DeviceEvent::Connected => LinkHealth::Connected,
            DeviceEvent::Disconnected { reason } => LinkHealth::Dropped { reason },
        };
        let result = feature
            .repo
            .push_change(move |state: &DeviceLinkState| match state {
                DeviceLinkState::Initializing {
                    activation,
                    monitor,
                }
                | DeviceLinkState::Session {
                    activation,
                    monitor,
                    ..
                } => Ok(Decision::advance_to(DeviceLinkState::Session {
                    activation: *activation,
                    monitor: Arc::clone(monitor),
                    health,
                })),
                _ => Ok(Decision::Remain),
            });
        if let Err(err) = result {
            warn!(error = %err, "dropping device event, repository closed");
        }
    }
}

/// The device link feature module.
pub struct DeviceLink {
    repo: ColdStateRepository<DeviceLinkState>,
    feed: Mutex<Option<ScriptedFeed<DeviceEvent>>>,
}

impl DeviceLink {
    /// Creates the feature with its cold repository.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let init_weak = weak.clone();
            let repo = ColdStateRepository::new(
                RepositoryName::try_new("device-link").expect("literal repository name is valid"),
                || DeviceLinkState::NotInitialized,
                move |state: &DeviceLinkState| match state {
                    DeviceLinkState::NotInitialized | DeviceLinkState::Deinitialized => {
                        let Some(feature) = init_weak.upgrade() else {
                            return Ok(Decision::Remain);
                        };
                        Ok(Decision::advance(async move {
                            let sink = Arc::new(DeviceSink {
                                feature: Arc::downgrade(&feature),
                            });
                            let (monitor, feed) = ScriptedMonitor::new(sink);
                            *feature.feed.lock().expect("mutex poisoned") = Some(feed);
                            Ok(DeviceLinkState::Initializing {
                                activation: ActivationId::new(),
                                monitor: Arc::new(monitor),
                            })
                        }))
                    }
                    _ => Ok(Decision::Remain),
                },
                |state: &DeviceLinkState| match state {
                    DeviceLinkState::Initializing { activation, .. }
                    | DeviceLinkState::Session { activation, .. } => Ok(Decision::advance_to(
                        DeviceLinkState::Deinitializing {
                            activation: *activation,
                        },
                    )),
                    DeviceLinkState::Deinitializing { .. } => {
                        Ok(Decision::advance_to(DeviceLinkState::Deinitialized))
                    }
                    _ => Ok(Decision::Remain),
                },
            );
            Self {
                repo,
                feed: Mutex::new(None),
            }
        })
    }

    /// Attaches an observer, cold-starting the device monitor if it is the
    /// first one.
    pub async fn subscribe(&self) -> TransitionResult<StateObserver<DeviceLinkState>> {
        self.repo.subscribe().await
    }

    /// The current device link state.
    pub fn current(&self) -> DeviceLinkState {
        self.repo.current()
    }

    /// The simulated device stack for the current activation cycle.
    pub fn device_feed(&self) -> Option<ScriptedFeed<DeviceEvent>> {
        self.feed.lock().expect("mutex poisoned").clone()
    }
}
