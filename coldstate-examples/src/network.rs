//! Network reachability as a cold state machine.
//!
//! The backing resource is a connectivity monitor that reports which kind of
//! link the device currently has. It runs only while someone is watching:
//! the first observer cold-starts it, the last one cold-stops it. In this
//! example crate the monitor is a [`ScriptedMonitor`] driven through
//! [`NetworkReachability::link_feed`], standing in for an OS connectivity
//! callback registration.

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

/// The kind of link the device currently has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkKind {
    /// Wi-Fi connectivity.
    Wifi,
    /// Cellular connectivity.
    Cellular,
    /// Wired connectivity.
    Ethernet,
    /// No connectivity.
    Offline,
}

/// Lifecycle of the network reachability feature.
#[derive(Debug, Clone)]
pub enum NetworkState {
    /// No observer has ever attached.
    NotInitialized,
    /// The connectivity monitor is starting; no link report yet.
    Initializing {
        /// The activation cycle that created the monitor.
        activation: ActivationId,
        /// The cycle's connectivity monitor.
        monitor: Arc<dyn ResourceMonitor>,
    },
    /// The monitor is running and the last reported link is known.
    Available {
        /// The activation cycle that created the monitor.
        activation: ActivationId,
        /// The cycle's connectivity monitor.
        monitor: Arc<dyn ResourceMonitor>,
        /// The most recently reported link.
        link: LinkKind,
    },
    /// The monitor has been stopped; teardown is completing.
    Deinitializing {
        /// The activation cycle being torn down.
        activation: ActivationId,
    },
    /// The last observer detached and teardown completed.
    Deinitialized,
}

impl NetworkState {
    /// Returns `true` once a link report is available.
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }

    /// The reported link, if one is available.
    pub const fn link(&self) -> Option<LinkKind> {
        match self {
            Self::Available { link, .. } => Some(*link),
            _ => None,
        }
    }

    /// The activation cycle this state belongs to, for active states.
    pub const fn activation(&self) -> Option<ActivationId> {
        match self {
            Self::Initializing { activation, .. }
            | Self::Available { activation, .. }
            | Self::Deinitializing { activation } => Some(*activation),
            _ => None,
        }
    }
}

impl RepositoryState for NetworkState {
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
            Self::Available { .. } => "available",
            Self::Deinitializing { .. } => "deinitializing",
            Self::Deinitialized => "deinitialized",
        }
    }

    fn detach_hook(&self) -> Option<&dyn DetachHook<Self>> {
        match self {
            Self::Initializing { .. } | Self::Available { .. } => Some(self),
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
impl DetachHook<Self> for NetworkState {
    async fn before_detach(&self, next: &Self) -> Result<(), BoxedError> {
        // The monitor is stopped, and known stopped, before the
        // deinitializing state becomes visible.
        if let (
            Self::Initializing { monitor, .. } | Self::Available { monitor, .. },
            Self::Deinitializing { .. },
        ) = (self, next)
        {
            monitor.stop_monitoring().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl AttachHook<Self> for NetworkState {
    async fn after_attach(&self, _previous: &Self) -> Result<(), BoxedError> {
        if let Self::Initializing { monitor, .. } = self {
            monitor.start_monitoring().await?;
        }
        Ok(())
    }
}

/// Funnels raw link reports from the monitor into the repository.
struct LinkSink {
    feature: Weak<NetworkReachability>,
}

#[async_trait]
impl EventSink<LinkKind> for LinkSink {
    async fn deliver(&self, link: LinkKind) {
        let Some(feature) = self.feature.upgrade() else {
            return;
        };
        let result = feature.repo.push_change(move |state: &NetworkState| match state {
            NetworkState::Initializing {
                activation,
                monitor,
            }
            | NetworkState::Available {
                activation,
                monitor,
                ..
            } => Ok(Decision::advance_to(NetworkState::Available {
                activation: *activation,
                monitor: Arc::clone(monitor),
                link,
            })),
            _ => Ok(Decision::Remain),
        });
        if let Err(err) = result {
            warn!(error = %err, "dropping link report, repository closed");
        }
    }
}

/// The network reachability feature module.
pub struct NetworkReachability {
    repo: ColdStateRepository<NetworkState>,
    feed: Mutex<Option<ScriptedFeed<LinkKind>>>,
}

impl NetworkReachability {
    /// Creates the feature with its cold repository.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let init_weak = weak.clone();
            let repo = ColdStateRepository::new(
                RepositoryName::try_new("network-reachability")
                    .expect("literal repository name is valid"),
                || NetworkState::NotInitialized,
                move |state: &NetworkState| match state {
                    NetworkState::NotInitialized | NetworkState::Deinitialized => {
                        let Some(feature) = init_weak.upgrade() else {
                            return Ok(Decision::Remain);
                        };
                        Ok(Decision::advance(async move {
                            let activation = ActivationId::new();
                            let sink = Arc::new(LinkSink {
                                feature: Arc::downgrade(&feature),
                            });
                            let (monitor, feed) = ScriptedMonitor::new(sink);
                            *feature.feed.lock().expect("mutex poisoned") = Some(feed);
                            Ok(NetworkState::Initializing {
                                activation,
                                monitor: Arc::new(monitor),
                            })
                        }))
                    }
                    _ => Ok(Decision::Remain),
                },
                |state: &NetworkState| match state {
                    NetworkState::Initializing { activation, .. }
                    | NetworkState::Available { activation, .. } => Ok(Decision::advance_to(
                        NetworkState::Deinitializing {
                            activation: *activation,
                        },
                    )),
                    NetworkState::Deinitializing { .. } => {
                        Ok(Decision::advance_to(NetworkState::Deinitialized))
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

    /// Attaches an observer, cold-starting the connectivity monitor if it is
    /// the first one.
    pub async fn subscribe(&self) -> TransitionResult<StateObserver<NetworkState>> {
        self.repo.subscribe().await
    }

    /// The current reachability state.
    pub fn current(&self) -> NetworkState {
        self.repo.current()
    }

    /// The current link, if the feature is initialized with a report.
    pub fn current_link(&self) -> Option<LinkKind> {
        self.repo.current().link()
    }

    /// The simulated connectivity source for the current activation cycle.
    ///
    /// Returns `None` before the first cold-start. A feed taken during an
    /// earlier activation stops accepting reports once that cycle's monitor
    /// is stopped.
    pub fn link_feed(&self) -> Option<ScriptedFeed<LinkKind>> {
        self.feed.lock().expect("mutex poisoned").clone()
    }

    /// The underlying cold repository.
    pub const fn repository(&self) -> &ColdStateRepository<NetworkState> {
        &self.repo
    }
}
