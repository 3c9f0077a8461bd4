//! Event relay between the bridge and real-time UI clients.
//!
//! Hardware events and link errors become [`RelayMessage`]s published on a
//! page topic of a [`RealtimeHub`]. UI commands travel the other way,
//! verbatim, to the link. The relay adds no logic of its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;

use crate::bridge::Bridge;
use crate::error::Result;
use crate::event::{Event, Subscription};
use crate::protocol::command;
use crate::transport::{AnyLink, Link};

/// Message type used for link errors.
pub const HARDWARE_ERROR: &str = "hardware_error";

/// Message type of status replies.
pub const STATUS: &str = "status";

/// Status reported before anything was relayed.
pub const UNKNOWN_STATUS: &str = "unknown";

/// Capacity of each page's broadcast channel.
const PAGE_CAPACITY: usize = 64;

/// Milliseconds since the Unix epoch.
fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// A message delivered to real-time subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayMessage {
    /// Event kind, e.g. `grinder_end_detected`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Raw frame, error text or status.
    pub data: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl RelayMessage {
    /// Creates a message stamped with the current time.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
            timestamp: current_timestamp_ms(),
        }
    }

    fn from_event(event: Event) -> Option<Self> {
        match event {
            Event::Hardware(event) => Some(Self::new(event.kind().as_str(), event.raw_frame())),
            Event::LinkError { message } => Some(Self::new(HARDWARE_ERROR, message)),
            Event::Connected | Event::Disconnected => None,
        }
    }
}

/// Real-time channel grouped by page topic.
///
/// Publishing never waits: pages without subscribers drop the message and
/// slow subscribers lose the oldest ones.
#[derive(Debug, Clone, Default)]
pub struct RealtimeHub {
    pages: Arc<RwLock<HashMap<String, broadcast::Sender<RelayMessage>>>>,
}

impl RealtimeHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to the messages of one page.
    pub async fn subscribe(&self, page: &str) -> broadcast::Receiver<RelayMessage> {
        let mut pages = self.pages.write().await;
        pages
            .entry(page.to_owned())
            .or_insert_with(|| broadcast::channel(PAGE_CAPACITY).0)
            .subscribe()
    }

    /// Publishes to a page and returns how many subscribers got the message.
    pub async fn publish(&self, page: &str, message: RelayMessage) -> usize {
        let pages = self.pages.read().await;
        pages
            .get(page)
            .and_then(|sender| sender.send(message).ok())
            .unwrap_or(0)
    }
}

/// Forwards bridge events to a hub page and UI commands to the link.
pub struct EventRelay {
    link: Arc<AnyLink>,
    page: String,
    last_kind: Arc<RwLock<Option<String>>>,
    task: JoinHandle<()>,
}

impl EventRelay {
    /// Starts relaying `bridge`'s events to `page` on `hub`.
    ///
    /// Events emitted after this call are relayed; earlier ones are not.
    #[must_use]
    pub fn spawn(bridge: &Bridge, hub: RealtimeHub, page: impl Into<String>) -> Self {
        let page = page.into();
        let last_kind = Arc::new(RwLock::new(None));

        let task = tokio::spawn(run(
            bridge.subscribe(),
            hub,
            page.clone(),
            Arc::clone(&last_kind),
        ));

        Self {
            link: bridge.link(),
            page,
            last_kind,
            task,
        }
    }

    /// Returns the page this relay publishes to.
    #[must_use]
    pub fn page(&self) -> &str {
        &self.page
    }

    /// Answers a status query with the last relayed message type.
    pub async fn status(&self) -> RelayMessage {
        let last = self.last_kind.read().await.clone();
        RelayMessage::new(STATUS, last.unwrap_or_else(|| UNKNOWN_STATUS.to_owned()))
    }

    /// Forwards a UI command to the controller.
    pub async fn command(&self, command: &Value) -> Result<()> {
        tracing::debug!("relaying command {}", command);
        let payload = command::encode(command)?;
        self.link.send(payload).await
    }
}

impl Drop for EventRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut events: Subscription,
    hub: RealtimeHub,
    page: String,
    last_kind: Arc<RwLock<Option<String>>>,
) {
    while let Some(event) = events.recv().await {
        let Some(message) = RelayMessage::from_event(event) else {
            continue;
        };

        *last_kind.write().await = Some(message.kind.clone());
        let kind = message.kind.clone();
        let delivered = hub.publish(&page, message).await;
        tracing::debug!("relayed {} to {} subscriber(s) on {}", kind, delivered, page);
    }
}
