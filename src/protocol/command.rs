//! Outbound command payloads.
//!
//! Commands are opaque JSON objects produced by the kiosk UI (motor, hopper
//! and grinder direction flags). The bridge forwards them verbatim; only the
//! simulator looks inside to decide how real hardware would answer.

use bytes::Bytes;
use serde_json::Value;

use crate::error::Result;

/// Hopper flag; `1` releases the accepted item towards the grinder.
pub const HOPPER: &str = "hopper";

/// Grinder direction flag; `1` runs forward, `0` stops.
pub const GRINDER: &str = "grinder";

/// What a command asks the controller to do, as far as responses go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Item accepted, release it into the grinder.
    DispenseConfirmed,
    /// Start grinding.
    GrindForward,
    /// Stop the grinder.
    GrindStop,
    /// Anything the controller answers without a state frame.
    Other,
}

impl CommandKind {
    /// Classifies a command object.
    #[must_use]
    pub fn classify(command: &Value) -> Self {
        let flag = |name: &str| command.get(name).and_then(Value::as_i64);

        if flag(HOPPER) == Some(1) {
            Self::DispenseConfirmed
        } else {
            match flag(GRINDER) {
                Some(1) => Self::GrindForward,
                Some(0) => Self::GrindStop,
                _ => Self::Other,
            }
        }
    }
}

/// Encodes a command object as wire bytes.
pub fn encode(command: &Value) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(command)?))
}

/// Decodes wire bytes back into a command object.
pub fn decode(payload: &[u8]) -> Result<Value> {
    Ok(serde_json::from_slice(payload)?)
}
