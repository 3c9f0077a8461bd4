//! Link layer between the bridge and the kiosk controller.
//!
//! Two implementations share the [`Link`] capability set: a real serial link
//! and a simulator used when no hardware is available. [`AnyLink`] picks one
//! at construction; nothing downstream knows which is active.
//!
//! Links report what happens on the wire as [`LinkSignal`]s through an mpsc
//! channel, in order, so the consumer sees resets and frames in the sequence
//! they occurred.

pub mod serial;
pub mod simulator;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};

use crate::error::Result;

pub use serial::{SerialConfig, SerialLink};
pub use simulator::{SimulatedLink, SimulatorConfig, SimulatorMode};

/// Boxed future returned by [`Link`] operations.
pub type LinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Lifecycle of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not connected.
    Idle,
    /// An open attempt (including its retries) is in flight.
    Opening,
    /// Connected.
    Open,
    /// A close is in flight.
    Closing,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
        })
    }
}

/// Notifications a link sends to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkSignal {
    /// The link opened.
    Opened,
    /// A complete frame arrived.
    Frame(String),
    /// The link closed.
    Closed,
    /// The link failed to open or reported an error.
    Fault(String),
}

/// Trait for link implementations.
///
/// All methods take `&self`: a second `connect` while one is in flight must
/// be rejected, not wait behind a lock.
pub trait Link: Send + Sync {
    /// Opens the link. A no-op if it is already open or opening.
    fn connect(&self) -> LinkFuture<'_, ()>;

    /// Closes the link. A no-op if it is not open.
    fn disconnect(&self) -> LinkFuture<'_, ()>;

    /// Writes a payload. Fails with [`Error::NotConnected`](crate::Error::NotConnected)
    /// when the link is not open; nothing is queued.
    fn send(&self, payload: Bytes) -> LinkFuture<'_, ()>;

    /// Returns the current lifecycle state.
    fn state(&self) -> LinkState;

    /// Returns true if connected.
    fn is_connected(&self) -> bool {
        self.state() == LinkState::Open
    }
}

/// Shared lifecycle state with atomic transitions.
#[derive(Debug, Clone)]
pub(crate) struct StateCell {
    sender: Arc<watch::Sender<LinkState>>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (sender, _) = watch::channel(LinkState::Idle);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub(crate) fn get(&self) -> LinkState {
        *self.sender.borrow()
    }

    /// Moves from `from` to `to`, or returns the state that blocked it.
    pub(crate) fn transition(
        &self,
        from: LinkState,
        to: LinkState,
    ) -> std::result::Result<(), LinkState> {
        let mut current = from;
        let moved = self.sender.send_if_modified(|state| {
            current = *state;
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved { Ok(()) } else { Err(current) }
    }

    pub(crate) fn set(&self, state: LinkState) {
        self.sender.send_replace(state);
    }
}

/// Sends a signal, tolerating a consumer that went away.
pub(crate) async fn notify(signals: &mpsc::Sender<LinkSignal>, signal: LinkSignal) {
    if signals.send(signal).await.is_err() {
        tracing::debug!("link signal receiver dropped");
    }
}

/// Which link to build.
#[derive(Debug, Clone)]
pub enum LinkTarget {
    /// A physical controller on a serial port.
    Serial(SerialConfig),
    /// The no-hardware substitute.
    Simulated(SimulatorConfig),
}

/// Link selected at construction time.
#[derive(Debug)]
pub enum AnyLink {
    /// Physical serial link.
    Serial(SerialLink),
    /// Simulated controller.
    Simulated(SimulatedLink),
}

impl AnyLink {
    /// Builds the link for `target`, reporting through `signals`.
    #[must_use]
    pub fn new(target: LinkTarget, signals: mpsc::Sender<LinkSignal>) -> Self {
        match target {
            LinkTarget::Serial(config) => Self::Serial(SerialLink::new(config, signals)),
            LinkTarget::Simulated(config) => Self::Simulated(SimulatedLink::new(config, signals)),
        }
    }

    /// Returns true if this is the simulator.
    #[must_use]
    pub const fn is_simulated(&self) -> bool {
        matches!(self, Self::Simulated(_))
    }
}

impl Link for AnyLink {
    fn connect(&self) -> LinkFuture<'_, ()> {
        match self {
            Self::Serial(link) => link.connect(),
            Self::Simulated(link) => link.connect(),
        }
    }

    fn disconnect(&self) -> LinkFuture<'_, ()> {
        match self {
            Self::Serial(link) => link.disconnect(),
            Self::Simulated(link) => link.disconnect(),
        }
    }

    fn send(&self, payload: Bytes) -> LinkFuture<'_, ()> {
        match self {
            Self::Serial(link) => link.send(payload),
            Self::Simulated(link) => link.send(payload),
        }
    }

    fn state(&self) -> LinkState {
        match self {
            Self::Serial(link) => link.state(),
            Self::Simulated(link) => link.state(),
        }
    }
}
