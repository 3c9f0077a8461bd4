//! State-transition detection.
//!
//! Each decoded frame is compared against the state before it. Rules fire on
//! rising edges, with a few cross-signal conditions that mirror how the
//! controller sequences an item through inspection and grinding. The state is
//! merged once, after every rule has seen the same previous state.

use crate::event::{HardwareEvent, HardwareEventKind};
use crate::state::{DeviceState, Signals};

/// Derives hardware events from consecutive frames.
#[derive(Debug, Default)]
pub struct Detector {
    state: DeviceState,
}

impl Detector {
    /// Creates a detector at the baseline state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DeviceState::baseline(),
        }
    }

    /// Returns the last observed state.
    #[must_use]
    pub const fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Returns to the baseline so the next rising edge is seen.
    pub fn reset(&mut self) {
        tracing::debug!("device state reset to baseline");
        self.state.reset();
    }

    /// Decodes one frame and returns the events it triggers.
    ///
    /// A frame that is not valid JSON is logged and ignored; the state is
    /// left untouched.
    pub fn on_frame(&mut self, frame: &str) -> Vec<HardwareEvent> {
        match Signals::from_frame(frame) {
            Ok(signals) => self.apply(&signals, frame),
            Err(e) => {
                tracing::warn!("failed to decode frame {:?}: {}", frame, e);
                Vec::new()
            }
        }
    }

    /// Evaluates the transition rules for already decoded signals.
    pub fn apply(&mut self, curr: &Signals, frame: &str) -> Vec<HardwareEvent> {
        let prev = *self.state.signals();
        let mut kinds = Vec::new();

        if curr.movement == Some(1) {
            kinds.push(HardwareEventKind::Movement);
        }

        if rising(prev.belt_separator, curr.belt_separator) {
            kinds.push(HardwareEventKind::BeltSeparatorComplete);
        }

        if rising(prev.input_pet, curr.input_pet) {
            kinds.push(HardwareEventKind::InputPetDetected);
        }

        if rising(prev.clear_pet, curr.clear_pet) {
            kinds.push(HardwareEventKind::InputPetDetected);
            if curr.grinder == Some(1) {
                kinds.push(HardwareEventKind::GrinderForwardDetected);
            }
        } else if rising(prev.grinder, curr.grinder)
            && curr.clear_pet.or(prev.clear_pet) == Some(1)
        {
            // Grinder started in a later frame than the clear signal.
            kinds.push(HardwareEventKind::GrinderForwardDetected);
        }

        let prev_err = prev.clear_pet == Some(0) && prev.err_pet == Some(1);
        let curr_err = curr.clear_pet == Some(0) && curr.err_pet == Some(1);
        if curr_err && !prev_err {
            kinds.push(HardwareEventKind::ErrPetDetected);
        }

        if curr.grinder == Some(0) && prev.grinder != Some(0) {
            kinds.push(HardwareEventKind::GrinderEndDetected);
        }

        self.state.merge(curr);

        if !kinds.is_empty() {
            tracing::debug!("frame {} triggered {:?}", frame, kinds);
        }
        kinds
            .into_iter()
            .map(|kind| HardwareEvent::new(kind, frame))
            .collect()
    }
}

fn rising(prev: Option<i64>, curr: Option<i64>) -> bool {
    prev != Some(1) && curr == Some(1)
}
