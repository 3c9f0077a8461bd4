//! Event system for hardware notifications.
//!
//! The detector and the links emit [`Event`]s into an [`EventDispatcher`];
//! any number of subscribers (the relay, tests, diagnostics) receive them.
//! Each dispatcher is independent, so several bridges can coexist.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

/// Kinds of semantic hardware events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareEventKind {
    /// Motion sensor pulse.
    Movement,
    /// Belt separator finished positioning an item.
    BeltSeparatorComplete,
    /// An item was detected at the input or cleared inspection.
    InputPetDetected,
    /// The grinder started running forward with an item cleared.
    GrinderForwardDetected,
    /// The item was rejected.
    ErrPetDetected,
    /// The grinder stopped.
    GrinderEndDetected,
}

impl HardwareEventKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Movement => "movement",
            Self::BeltSeparatorComplete => "belt_separator_complete",
            Self::InputPetDetected => "input_pet_detected",
            Self::GrinderForwardDetected => "grinder_forward_detected",
            Self::ErrPetDetected => "err_pet_detected",
            Self::GrinderEndDetected => "grinder_end_detected",
        }
    }
}

impl fmt::Display for HardwareEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A semantic event derived from one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareEvent {
    kind: HardwareEventKind,
    raw_frame: Arc<str>,
}

impl HardwareEvent {
    /// Creates an event for the frame that triggered it.
    #[must_use]
    pub fn new(kind: HardwareEventKind, raw_frame: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            raw_frame: raw_frame.into(),
        }
    }

    /// Returns the event kind.
    #[must_use]
    pub const fn kind(&self) -> HardwareEventKind {
        self.kind
    }

    /// Returns the frame text the event was derived from.
    #[must_use]
    pub fn raw_frame(&self) -> &str {
        &self.raw_frame
    }
}

/// Event types that can be dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Link opened.
    Connected,
    /// Link closed, locally or by the device.
    Disconnected,
    /// Hardware event derived from a frame.
    Hardware(HardwareEvent),
    /// Link failed to open or reported a hardware error.
    LinkError { message: String },
}

impl Event {
    /// Returns the hardware event kind if applicable.
    #[must_use]
    pub const fn hardware_kind(&self) -> Option<HardwareEventKind> {
        match self {
            Self::Hardware(event) => Some(event.kind),
            _ => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` once the dispatcher is gone. A subscriber that falls
    /// behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("subscriber lagged, skipped {} events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Subscription filter for specific event types.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by hardware event kinds.
    pub kinds: Option<Vec<HardwareEventKind>>,
    /// Match link errors.
    pub link_errors: bool,
}

impl EventFilter {
    /// Creates a filter for specific hardware event kinds.
    #[must_use]
    pub const fn kinds(kinds: Vec<HardwareEventKind>) -> Self {
        Self {
            kinds: Some(kinds),
            link_errors: false,
        }
    }

    /// Creates a filter for a single hardware event kind.
    #[must_use]
    pub fn kind(kind: HardwareEventKind) -> Self {
        Self::kinds(vec![kind])
    }

    /// Creates a filter for link errors.
    #[must_use]
    pub const fn link_errors() -> Self {
        Self {
            kinds: Some(Vec::new()),
            link_errors: true,
        }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Event::LinkError { .. } = event {
            return self.link_errors || self.kinds.is_none();
        }

        match (&self.kinds, event.hardware_kind()) {
            (None, _) => true,
            (Some(kinds), Some(kind)) => kinds.contains(&kind),
            (Some(_), None) => false,
        }
    }
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    sender: broadcast::Sender<Event>,
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emits an event to all subscribers.
    pub fn emit(&self, event: Event) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribes to all events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
        }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires or the dispatcher is gone.
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Option<Event> {
        let subscription = self.subscribe();
        wait_matching(subscription, filter, timeout).await
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

/// Reads `subscription` until an event matches `filter` or `timeout` expires.
pub async fn wait_matching(
    mut subscription: Subscription,
    filter: EventFilter,
    timeout: Duration,
) -> Option<Event> {
    tokio::select! {
        biased;
        result = async {
            while let Some(event) = subscription.recv().await {
                if filter.matches(&event) {
                    return Some(event);
                }
            }
            None
        } => result,
        () = tokio::time::sleep(timeout) => None,
    }
}
