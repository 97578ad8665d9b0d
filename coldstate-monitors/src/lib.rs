//! In-process resource monitors for the `ColdState` engine
//!
//! This crate provides `ResourceMonitor` implementations that run entirely
//! in-process, useful for testing and development scenarios where real OS
//! integrations (connectivity callbacks, permission services, device stacks)
//! are not available:
//!
//! - [`ScriptedMonitor`]: events are pushed by test or demo code through a
//!   [`ScriptedFeed`] handle.
//! - [`IntervalPoller`]: samples an asynchronous [`Probe`] on a fixed
//!   interval and delivers only value changes, the shape of a permission
//!   poller.
//!
//! Both follow the same start/stop mechanics: `start_monitoring` spawns a
//! delivery task guarded by an already-started check, `stop_monitoring`
//! signals a oneshot shutdown and awaits the task handle, so completion of
//! stop means no further event will be delivered.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use async_trait::async_trait;
use coldstate::{EventSink, MonitorError, MonitorResult, ResourceMonitor};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time,
};
use tracing::debug;

/// A monitor whose event sequence is scripted by the caller.
///
/// Created together with a [`ScriptedFeed`] that test or demo code pushes
/// raw events through. Events pushed before `start_monitoring` are buffered
/// and delivered once the monitor starts; events pushed after
/// `stop_monitoring` fail with [`MonitorError::ChannelClosed`].
pub struct ScriptedMonitor<E> {
    sink: Arc<dyn EventSink<E>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<E>>>,
    running: AtomicBool,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// The push handle paired with a [`ScriptedMonitor`].
#[derive(Debug, Clone)]
pub struct ScriptedFeed<E> {
    events: mpsc::UnboundedSender<E>,
}

impl<E> ScriptedFeed<E> {
    /// Pushes one raw event into the monitor.
    pub fn push(&self, event: E) -> MonitorResult<()> {
        self.events
            .send(event)
            .map_err(|_| MonitorError::ChannelClosed)
    }
}

impl<E> ScriptedMonitor<E>
where
    E: Send + 'static,
{
    /// Creates a monitor delivering into `sink`, plus its feed handle.
    pub fn new(sink: Arc<dyn EventSink<E>>) -> (Self, ScriptedFeed<E>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let monitor = Self {
            sink,
            events: Mutex::new(Some(events_rx)),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        };
        (monitor, ScriptedFeed { events: events_tx })
    }
}

#[async_trait]
impl<E> ResourceMonitor for ScriptedMonitor<E>
where
    E: Send + 'static,
{
    async fn start_monitoring(&self) -> MonitorResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(MonitorError::AlreadyStarted);
        }

        let receiver = self.events.lock().expect("mutex poisoned").take();
        let Some(mut events) = receiver else {
            // A completed start/stop cycle consumed the receiver; this
            // monitor instance cannot be activated again.
            self.running.store(false, Ordering::Release);
            return Err(MonitorError::AlreadyStarted);
        };

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        *self.shutdown.lock().expect("mutex poisoned") = Some(shutdown_tx);

        let sink = Arc::clone(&self.sink);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    event = events.recv() => match event {
                        Some(event) => sink.deliver(event).await,
                        None => break,
                    },
                }
            }
            debug!("scripted monitor delivery task stopped");
        });
        *self.task.lock().expect("mutex poisoned") = Some(handle);
        Ok(())
    }

    async fn stop_monitoring(&self) -> MonitorResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(MonitorError::NotStarted);
        }

        if let Some(shutdown) = self.shutdown.lock().expect("mutex poisoned").take() {
            let _ = shutdown.send(());
        }

        // Extract the task handle first to avoid holding the mutex across await
        let handle = self.task.lock().expect("mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }
}

impl<E> fmt::Debug for ScriptedMonitor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedMonitor")
            .field("running", &self.running.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// An asynchronous source of sampled values for an [`IntervalPoller`].
#[async_trait]
pub trait Probe<E>: Send + Sync {
    /// Samples the current value.
    async fn sample(&self) -> E;
}

/// A monitor that polls a [`Probe`] on a fixed interval and delivers only
/// distinct consecutive values.
pub struct IntervalPoller<E> {
    probe: Arc<dyn Probe<E>>,
    sink: Arc<dyn EventSink<E>>,
    poll_interval: Duration,
    running: AtomicBool,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<E> IntervalPoller<E>
where
    E: Clone + PartialEq + Send + Sync + 'static,
{
    /// Creates a poller over `probe` delivering changes into `sink`.
    pub fn new(probe: Arc<dyn Probe<E>>, sink: Arc<dyn EventSink<E>>) -> Self {
        Self {
            probe,
            sink,
            poll_interval: Duration::from_millis(100),
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Sets the polling interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl<E> ResourceMonitor for IntervalPoller<E>
where
    E: Clone + PartialEq + Send + Sync + 'static,
{
    async fn start_monitoring(&self) -> MonitorResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(MonitorError::AlreadyStarted);
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        *self.shutdown.lock().expect("mutex poisoned") = Some(shutdown_tx);

        let probe = Arc::clone(&self.probe);
        let sink = Arc::clone(&self.sink);
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(poll_interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
            let mut last: Option<E> = None;
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let value = probe.sample().await;
                        if last.as_ref() != Some(&value) {
                            sink.deliver(value.clone()).await;
                            last = Some(value);
                        }
                    }
                }
            }
            debug!("interval poller task stopped");
        });
        *self.task.lock().expect("mutex poisoned") = Some(handle);
        Ok(())
    }

    async fn stop_monitoring(&self) -> MonitorResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            return Err(MonitorError::NotStarted);
        }

        if let Some(shutdown) = self.shutdown.lock().expect("mutex poisoned").take() {
            let _ = shutdown.send(());
        }

        let handle = self.task.lock().expect("mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }
}

impl<E> fmt::Debug for IntervalPoller<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntervalPoller")
            .field("poll_interval", &self.poll_interval)
            .field("running", &self.running.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU8;

    /// Sink that records deliveries and signals each one on a channel.
    struct RecordingSink<E> {
        recorded: Mutex<Vec<E>>,
        delivered: mpsc::UnboundedSender<()>,
    }

    impl<E> RecordingSink<E> {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<()>) {
            let (delivered, notifications) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    recorded: Mutex::new(Vec::new()),
                    delivered,
                }),
                notifications,
            )
        }

        fn recorded(&self) -> Vec<E>
        where
            E: Clone,
        {
            self.recorded.lock().expect("mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl<E> EventSink<E> for RecordingSink<E>
    where
        E: Send + Sync,
    {
        async fn deliver(&self, event: E) {
            self.recorded.lock().expect("mutex poisoned").push(event);
            let _ = self.delivered.send(());
        }
    }

    #[tokio::test]
    async fn scripted_monitor_delivers_pushed_events_in_order() {
        let (sink, mut delivered) = RecordingSink::new();
        let (monitor, feed) = ScriptedMonitor::new(sink.clone() as Arc<dyn EventSink<u32>>);

        monitor.start_monitoring().await.unwrap();
        feed.push(1).unwrap();
        feed.push(2).unwrap();
        delivered.recv().await.unwrap();
        delivered.recv().await.unwrap();

        assert_eq!(sink.recorded(), vec![1u32, 2]);
        monitor.stop_monitoring().await.unwrap();
    }

    #[tokio::test]
    async fn scripted_monitor_buffers_events_pushed_before_start() {
        let (sink, mut delivered) = RecordingSink::new();
        let (monitor, feed) = ScriptedMonitor::new(sink.clone() as Arc<dyn EventSink<u32>>);

        feed.push(7).unwrap();
        monitor.start_monitoring().await.unwrap();
        delivered.recv().await.unwrap();

        assert_eq!(sink.recorded(), vec![7u32]);
        monitor.stop_monitoring().await.unwrap();
    }

    #[tokio::test]
    async fn scripted_monitor_is_silent_after_stop() {
        let (sink, mut delivered) = RecordingSink::new();
        let (monitor, feed) = ScriptedMonitor::new(sink.clone() as Arc<dyn EventSink<u32>>);

        monitor.start_monitoring().await.unwrap();
        feed.push(1).unwrap();
        delivered.recv().await.unwrap();
        monitor.stop_monitoring().await.unwrap();

        assert_eq!(feed.push(2), Err(MonitorError::ChannelClosed));
        assert_eq!(sink.recorded(), vec![1u32]);
    }

    #[tokio::test]
    async fn scripted_monitor_guards_its_lifecycle() {
        let (sink, _delivered) = RecordingSink::<u32>::new();
        let (monitor, _feed) = ScriptedMonitor::new(sink as Arc<dyn EventSink<u32>>);

        assert_eq!(
            monitor.stop_monitoring().await,
            Err(MonitorError::NotStarted)
        );

        monitor.start_monitoring().await.unwrap();
        assert_eq!(
            monitor.start_monitoring().await,
            Err(MonitorError::AlreadyStarted)
        );

        monitor.stop_monitoring().await.unwrap();
        assert_eq!(
            monitor.start_monitoring().await,
            Err(MonitorError::AlreadyStarted)
        );
    }

    struct SteppingProbe {
        value: AtomicU8,
    }

    #[async_trait]
    impl Probe<u8> for SteppingProbe {
        async fn sample(&self) -> u8 {
            self.value.load(Ordering::Acquire)
        }
    }

    #[tokio::test]
    async fn interval_poller_delivers_only_value_changes() {
        let probe = Arc::new(SteppingProbe {
            value: AtomicU8::new(10),
        });
        let (sink, mut delivered) = RecordingSink::new();
        let poller = IntervalPoller::new(
            probe.clone() as Arc<dyn Probe<u8>>,
            sink.clone() as Arc<dyn EventSink<u8>>,
        )
        .with_poll_interval(Duration::from_millis(1));

        poller.start_monitoring().await.unwrap();
        delivered.recv().await.unwrap();

        probe.value.store(20, Ordering::Release);
        delivered.recv().await.unwrap();

        poller.stop_monitoring().await.unwrap();

        // Many ticks happened, but only the two distinct values arrived.
        assert_eq!(sink.recorded(), vec![10u8, 20]);
    }

    #[tokio::test]
    async fn interval_poller_guards_its_lifecycle() {
        let probe = Arc::new(SteppingProbe {
            value: AtomicU8::new(0),
        });
        let (sink, _delivered) = RecordingSink::<u8>::new();
        let poller = IntervalPoller::new(
            probe as Arc<dyn Probe<u8>>,
            sink as Arc<dyn EventSink<u8>>,
        );

        assert_eq!(
            poller.stop_monitoring().await,
            Err(MonitorError::NotStarted)
        );
        poller.start_monitoring().await.unwrap();
        assert_eq!(
            poller.start_monitoring().await,
            Err(MonitorError::AlreadyStarted)
        );
        poller.stop_monitoring().await.unwrap();
    }
}
