//! # recycle-bridge
//!
//! Hardware bridge for self-service recycling kiosks.
//!
//! The bridge talks to the kiosk controller over a serial link, extracts JSON
//! frames from the byte stream, turns signal transitions into semantic
//! hardware events and relays them to real-time UI clients. Without hardware
//! a simulated controller takes the link's place and behaves the same way.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Frame reassembly across arbitrary chunk boundaries
//! - Edge detection over the belt, inspection, grinder and reject signals
//! - Bounded retry with linear backoff when the port is busy
//! - Drop-in simulator for development kiosks
//!
//! ## Quick Start
//!
//! ```no_run
//! use recycle_bridge::{Bridge, BridgeConfig, EventRelay, RealtimeHub};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), recycle_bridge::Error> {
//!     let config = BridgeConfig::from_env()?;
//!     let bridge = Bridge::from_config(&config)?;
//!
//!     let hub = RealtimeHub::new();
//!     let mut page = hub.subscribe(&config.page).await;
//!     let _relay = EventRelay::spawn(&bridge, hub.clone(), config.page.clone());
//!
//!     bridge.connect().await?;
//!
//!     while let Ok(message) = page.recv().await {
//!         println!("{} {}", message.kind, message.data);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Frame extraction and outbound command encoding
//! - [`state`] - Device state vector
//! - [`detector`] - State-transition rules
//! - [`event`] - Event types and dispatcher
//! - [`transport`] - Serial link and simulator behind one [`Link`] trait
//! - [`relay`] - Real-time hub and [`EventRelay`]
//! - [`bridge`] - The [`Bridge`] tying it together

pub mod bridge;
pub mod config;
pub mod detector;
pub mod error;
pub mod event;
pub mod protocol;
pub mod relay;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use detector::Detector;
pub use error::{Error, Result};
pub use event::{
    Event, EventDispatcher, EventFilter, HardwareEvent, HardwareEventKind, Subscription,
};
pub use protocol::{CommandKind, FrameDecoder};
pub use relay::{EventRelay, RealtimeHub, RelayMessage};
pub use state::{DeviceState, Signals};
pub use transport::{
    AnyLink, Link, LinkSignal, LinkState, LinkTarget, SerialConfig, SerialLink, SimulatedLink,
    SimulatorConfig, SimulatorMode, serial::list_ports,
};
