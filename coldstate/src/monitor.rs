//! The resource monitor collaborator interface.
//!
//! A resource monitor is the thing a cold repository actually starts and
//! stops: a connectivity watcher, a device connection, a permission poller.
//! The engine treats it as a black box with exactly three contract-relevant
//! behaviors: events are pushed after start, silence follows stop, and stop
//! completes before the active state's before-detach hook returns, so a
//! resource never runs unowned after deinitialization.
//!
//! Monitors deliver raw domain events through an [`EventSink`]; feature code
//! funnels delivered events into the repository, typically with the
//! fire-and-forget [`push_change`](crate::StateRepository::push_change) so a
//! monitor's delivery task never waits on the transition worker.

use crate::errors::MonitorResult;
use async_trait::async_trait;
use std::fmt;

/// A feature's backing resource, started on cold-start and stopped on
/// cold-stop.
#[async_trait]
pub trait ResourceMonitor: Send + Sync + fmt::Debug {
    /// Begins producing raw domain events.
    ///
    /// Called at most once per activation cycle; a second call fails with
    /// [`MonitorError::AlreadyStarted`](crate::MonitorError::AlreadyStarted).
    /// Must not block the caller materially - genuine OS integrations report
    /// back through their event channel rather than a return value.
    async fn start_monitoring(&self) -> MonitorResult<()>;

    /// Stops producing events and releases underlying resources.
    ///
    /// Completion of this future means the monitor is known-stopped: no
    /// event will be delivered afterwards.
    async fn stop_monitoring(&self) -> MonitorResult<()>;
}

/// Delivery target for a monitor's raw domain events.
#[async_trait]
pub trait EventSink<E>: Send + Sync {
    /// Accepts one raw event.
    async fn deliver(&self, event: E);
}
