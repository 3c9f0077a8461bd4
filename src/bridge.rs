//! Main [`Bridge`] implementation.
//!
//! The bridge owns the active link and a single processing task. That task is
//! the only owner of the [`Detector`], so resets, rule evaluation and state
//! merges happen strictly in the order the link reported them.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::BridgeConfig;
use crate::detector::Detector;
use crate::error::Result;
use crate::event::{Event, EventDispatcher, EventFilter, Subscription};
use crate::protocol::command;
use crate::transport::{AnyLink, Link, LinkSignal, LinkState, LinkTarget};

/// Capacity of the link signal channel.
const SIGNAL_CAPACITY: usize = 256;

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 256;

/// Hardware bridge to one kiosk controller.
///
/// Must be created inside a Tokio runtime.
pub struct Bridge {
    link: Arc<AnyLink>,
    dispatcher: EventDispatcher,
    process_task: JoinHandle<()>,
}

impl Bridge {
    /// Creates a bridge for the given link target (not yet connected).
    #[must_use]
    pub fn new(target: LinkTarget) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CAPACITY);
        let link = Arc::new(AnyLink::new(target, signal_tx));
        let dispatcher = EventDispatcher::new(EVENT_CAPACITY);

        let process_task = tokio::spawn(process_signals(signal_rx, dispatcher.clone()));

        Self {
            link,
            dispatcher,
            process_task,
        }
    }

    /// Creates a bridge for the link the configuration selects.
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let target = config.link_target()?;
        match &target {
            LinkTarget::Serial(serial) => {
                tracing::info!("using serial controller on {}", serial.port);
            }
            LinkTarget::Simulated(sim) => {
                tracing::info!("no hardware, using simulated controller ({:?})", sim.mode);
            }
        }
        Ok(Self::new(target))
    }

    /// Opens the link.
    ///
    /// A call while the link is already open or opening is ignored.
    pub async fn connect(&self) -> Result<()> {
        self.link.connect().await
    }

    /// Closes the link.
    pub async fn disconnect(&self) -> Result<()> {
        self.link.disconnect().await
    }

    /// Writes a raw payload to the controller.
    pub async fn send(&self, payload: Bytes) -> Result<()> {
        self.link.send(payload).await
    }

    /// Encodes and writes a command object.
    pub async fn send_command(&self, command: &Value) -> Result<()> {
        let payload = command::encode(command)?;
        self.link.send(payload).await
    }

    /// Returns true if connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Returns the link lifecycle state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.link.state()
    }

    /// Returns the active link.
    #[must_use]
    pub fn link(&self) -> Arc<AnyLink> {
        Arc::clone(&self.link)
    }

    /// Subscribes to events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.dispatcher.subscribe()
    }

    /// Waits for an event matching `filter`.
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Option<Event> {
        self.dispatcher.wait_for(filter, timeout).await
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.process_task.abort();
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("link", &self.link)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

/// Turns link signals into events.
async fn process_signals(mut signals: mpsc::Receiver<LinkSignal>, dispatcher: EventDispatcher) {
    let mut detector = Detector::new();

    while let Some(signal) = signals.recv().await {
        match signal {
            LinkSignal::Opened => {
                detector.reset();
                dispatcher.emit(Event::Connected);
            }
            LinkSignal::Closed => {
                detector.reset();
                dispatcher.emit(Event::Disconnected);
            }
            LinkSignal::Frame(frame) => {
                tracing::trace!("processing frame {}", frame);
                for event in detector.on_frame(&frame) {
                    dispatcher.emit(Event::Hardware(event));
                }
            }
            LinkSignal::Fault(message) => {
                dispatcher.emit(Event::LinkError { message });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::HardwareEventKind;
    use crate::transport::{SerialConfig, SimulatorConfig, SimulatorMode};

    #[tokio::test]
    async fn test_frames_become_events() {
        let (tx, rx) = mpsc::channel(8);
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe();
        let task = tokio::spawn(process_signals(rx, dispatcher));

        tx.send(LinkSignal::Opened).await.unwrap();
        tx.send(LinkSignal::Frame(r#"{"belt_separator":1}"#.into()))
            .await
            .unwrap();
        tx.send(LinkSignal::Frame("{not json}".into())).await.unwrap();
        tx.send(LinkSignal::Closed).await.unwrap();
        tx.send(LinkSignal::Opened).await.unwrap();
        tx.send(LinkSignal::Frame(r#"{"belt_separator":1}"#.into()))
            .await
            .unwrap();
        drop(tx);
        task.await.unwrap();

        let mut events = Vec::new();
        while let Ok(event) = tokio::time::timeout(Duration::from_millis(10), sub.recv()).await {
            match event {
                Some(event) => events.push(event),
                None => break,
            }
        }

        assert_eq!(events.len(), 5);
        assert_eq!(events[0], Event::Connected);
        assert_eq!(
            events[1].hardware_kind(),
            Some(HardwareEventKind::BeltSeparatorComplete)
        );
        assert_eq!(events[2], Event::Disconnected);
        assert_eq!(events[3], Event::Connected);
        assert_eq!(
            events[4].hardware_kind(),
            Some(HardwareEventKind::BeltSeparatorComplete)
        );
    }

    #[tokio::test]
    async fn test_faults_become_link_errors() {
        let (tx, rx) = mpsc::channel(8);
        let dispatcher = EventDispatcher::new(16);
        let mut sub = dispatcher.subscribe();
        tokio::spawn(process_signals(rx, dispatcher));

        tx.send(LinkSignal::Fault("port vanished".into()))
            .await
            .unwrap();

        assert_eq!(
            sub.recv().await,
            Some(Event::LinkError {
                message: "port vanished".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_open_is_reported() {
        let bridge = Bridge::new(LinkTarget::Serial(SerialConfig::new(
            "/dev/recycle-bridge-missing-tty",
        )));
        let mut sub = bridge.subscribe();

        assert!(bridge.connect().await.is_err());
        assert!(!bridge.is_connected());
        assert!(matches!(sub.recv().await, Some(Event::LinkError { .. })));
    }

    #[tokio::test]
    async fn test_from_config_uses_simulator_without_port() {
        let bridge = Bridge::from_config(&BridgeConfig::default()).unwrap();
        assert!(bridge.link().is_simulated());
        assert_eq!(bridge.state(), LinkState::Idle);

        let bridge = Bridge::new(LinkTarget::Simulated(SimulatorConfig::new(
            SimulatorMode::Idle,
        )));
        bridge.connect().await.unwrap();
        assert!(bridge.is_connected());
        bridge.disconnect().await.unwrap();
        assert!(!bridge.is_connected());
    }
}
