//! Simulated controller for kiosks without hardware.
//!
//! Answers commands with the frames real hardware would send, after similar
//! delays, so the rest of the bridge behaves exactly as it would on a kiosk.
//! At most one scripted response is pending at a time; scheduling a new one
//! replaces the previous.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::protocol::{CommandKind, command};
use crate::transport::{Link, LinkFuture, LinkSignal, LinkState, StateCell, notify};

/// Frame announcing the first item on the belt.
pub const BELT_SEPARATOR_FRAME: &str = r#"{"belt_separator":1}"#;

/// Frame answering a confirmed dispense.
pub const DISPENSE_FRAME: &str = r#"{"clear_pet":1,"grinder":1}"#;

/// Frame answering a grind-forward command once grinding is done.
pub const GRIND_DONE_FRAME: &str = r#"{"grinder":0}"#;

/// Default delay before the first belt frame.
pub const DEFAULT_FIRST_FRAME_DELAY: Duration = Duration::from_secs(2);

/// Default delay before answering a dispense.
pub const DEFAULT_DISPENSE_DELAY: Duration = Duration::from_millis(1500);

/// Default delay before answering a grind-forward command.
pub const DEFAULT_GRIND_DELAY: Duration = Duration::from_secs(3);

/// How much of the controller to simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorMode {
    /// Hardware disabled: connect and answer commands, send nothing unprompted.
    Idle,
    /// No port configured: also announce a first item after connecting.
    Scripted,
}

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Simulation mode.
    pub mode: SimulatorMode,
    /// Delay before the first belt frame in scripted mode.
    pub first_frame_delay: Duration,
    /// Delay before answering a dispense.
    pub dispense_delay: Duration,
    /// Delay before answering a grind-forward command.
    pub grind_delay: Duration,
}

impl SimulatorConfig {
    /// Creates a simulator configuration with default delays.
    #[must_use]
    pub const fn new(mode: SimulatorMode) -> Self {
        Self {
            mode,
            first_frame_delay: DEFAULT_FIRST_FRAME_DELAY,
            dispense_delay: DEFAULT_DISPENSE_DELAY,
            grind_delay: DEFAULT_GRIND_DELAY,
        }
    }

    /// Sets the first frame delay.
    #[must_use]
    pub const fn first_frame_delay(mut self, delay: Duration) -> Self {
        self.first_frame_delay = delay;
        self
    }

    /// Sets the dispense response delay.
    #[must_use]
    pub const fn dispense_delay(mut self, delay: Duration) -> Self {
        self.dispense_delay = delay;
        self
    }

    /// Sets the grind response delay.
    #[must_use]
    pub const fn grind_delay(mut self, delay: Duration) -> Self {
        self.grind_delay = delay;
        self
    }
}

/// Simulated link.
#[derive(Debug)]
pub struct SimulatedLink {
    config: SimulatorConfig,
    state: StateCell,
    pending: Mutex<Option<JoinHandle<()>>>,
    signals: mpsc::Sender<LinkSignal>,
}

impl SimulatedLink {
    /// Creates a new, unconnected simulator.
    #[must_use]
    pub fn new(config: SimulatorConfig, signals: mpsc::Sender<LinkSignal>) -> Self {
        Self {
            config,
            state: StateCell::new(),
            pending: Mutex::new(None),
            signals,
        }
    }

    /// Returns the simulator configuration.
    #[must_use]
    pub const fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Returns true if a scripted response is waiting to fire.
    pub async fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    async fn schedule(&self, frame: &'static str, delay: Duration) {
        let state = self.state.clone();
        let signals = self.signals.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if state.get() == LinkState::Open {
                tracing::debug!("simulated frame: {}", frame);
                notify(&signals, LinkSignal::Frame(frame.to_owned())).await;
            }
        });

        if let Some(previous) = self.pending.lock().await.replace(task) {
            previous.abort();
        }
    }

    async fn cancel_pending(&self) {
        if let Some(task) = self.pending.lock().await.take() {
            task.abort();
        }
    }
}

impl Link for SimulatedLink {
    fn connect(&self) -> LinkFuture<'_, ()> {
        Box::pin(async move {
            if let Err(current) = self.state.transition(LinkState::Idle, LinkState::Open) {
                tracing::warn!("connect ignored: simulated link is {}", current);
                return Ok(());
            }

            tracing::info!("connected to simulated controller ({:?})", self.config.mode);
            notify(&self.signals, LinkSignal::Opened).await;

            if self.config.mode == SimulatorMode::Scripted {
                self.schedule(BELT_SEPARATOR_FRAME, self.config.first_frame_delay)
                    .await;
            }
            Ok(())
        })
    }

    fn disconnect(&self) -> LinkFuture<'_, ()> {
        Box::pin(async move {
            if let Err(current) = self.state.transition(LinkState::Open, LinkState::Closing) {
                tracing::warn!("disconnect ignored: simulated link is {}", current);
                return Ok(());
            }

            self.cancel_pending().await;
            self.state.set(LinkState::Idle);
            tracing::info!("disconnected from simulated controller");
            notify(&self.signals, LinkSignal::Closed).await;
            Ok(())
        })
    }

    fn send(&self, payload: Bytes) -> LinkFuture<'_, ()> {
        Box::pin(async move {
            if !self.is_connected() {
                tracing::warn!("dropping {} byte payload: not connected", payload.len());
                return Err(Error::NotConnected);
            }

            let command = match command::decode(&payload) {
                Ok(command) => command,
                Err(e) => {
                    tracing::warn!("simulator ignored unreadable command: {}", e);
                    return Ok(());
                }
            };

            match CommandKind::classify(&command) {
                CommandKind::DispenseConfirmed => {
                    self.schedule(DISPENSE_FRAME, self.config.dispense_delay)
                        .await;
                }
                CommandKind::GrindForward => {
                    self.schedule(GRIND_DONE_FRAME, self.config.grind_delay)
                        .await;
                }
                CommandKind::GrindStop => {
                    tracing::debug!("grind stop: cancelling pending response");
                    self.cancel_pending().await;
                }
                CommandKind::Other => {
                    tracing::info!("simulated controller acknowledged {}", command);
                }
            }
            Ok(())
        })
    }

    fn state(&self) -> LinkState {
        self.state.get()
    }
}
