//! Device state vector and decoded frame signals.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Signal values carried by one frame.
///
/// Every field is optional: a frame only reports the signals that changed
/// or that the controller chose to repeat. Integral numbers (`1` or `1.0`)
/// are read as integers; any other value is treated as absent. A frame that
/// repeats a key does not decode at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Signals {
    /// Belt separator finished positioning an item.
    #[serde(deserialize_with = "lenient")]
    pub belt_separator: Option<i64>,
    /// Item present at the input.
    #[serde(deserialize_with = "lenient")]
    pub input_pet: Option<i64>,
    /// Item cleared the inspection stage.
    #[serde(deserialize_with = "lenient")]
    pub clear_pet: Option<i64>,
    /// Grinder running.
    #[serde(deserialize_with = "lenient")]
    pub grinder: Option<i64>,
    /// Item rejected.
    #[serde(deserialize_with = "lenient")]
    pub err_pet: Option<i64>,
    /// Motion sensor pulse.
    #[serde(deserialize_with = "lenient")]
    pub movement: Option<i64>,
}

fn lenient<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.as_i64().or_else(|| integral(value.as_f64()?)))
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn integral(value: f64) -> Option<i64> {
    (value.fract() == 0.0 && value.abs() < 9.0e15).then_some(value as i64)
}

impl Signals {
    /// Decodes the signals of one frame.
    pub fn from_frame(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }
}

/// Last observed value of every signal.
///
/// Starts from [`DeviceState::baseline`]: all zero, with `grinder` unset
/// until the controller first reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    signals: Signals,
}

impl DeviceState {
    /// The reference state used after construction and on every (re)connect.
    #[must_use]
    pub const fn baseline() -> Self {
        Self {
            signals: Signals {
                belt_separator: Some(0),
                input_pet: Some(0),
                clear_pet: Some(0),
                grinder: None,
                err_pet: Some(0),
                movement: Some(0),
            },
        }
    }

    /// Returns the current signal values.
    #[must_use]
    pub const fn signals(&self) -> &Signals {
        &self.signals
    }

    /// Overwrites the fields `observed` carries and keeps all others.
    pub fn merge(&mut self, observed: &Signals) {
        fn sticky(slot: &mut Option<i64>, value: Option<i64>) {
            if value.is_some() {
                *slot = value;
            }
        }

        let s = &mut self.signals;
        sticky(&mut s.belt_separator, observed.belt_separator);
        sticky(&mut s.input_pet, observed.input_pet);
        sticky(&mut s.clear_pet, observed.clear_pet);
        sticky(&mut s.grinder, observed.grinder);
        sticky(&mut s.err_pet, observed.err_pet);
        sticky(&mut s.movement, observed.movement);
    }

    /// Returns to the baseline.
    pub fn reset(&mut self) {
        *self = Self::baseline();
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::baseline()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_partial_frame() {
        let signals = Signals::from_frame(r#"{"clear_pet":1,"grinder":1}"#).unwrap();
        assert_eq!(signals.clear_pet, Some(1));
        assert_eq!(signals.grinder, Some(1));
        assert_eq!(signals.belt_separator, None);
        assert_eq!(signals.err_pet, None);
    }

    #[test]
    fn test_decode_ignores_unknown_and_non_integer_fields() {
        let signals =
            Signals::from_frame(r#"{"grinder":"on","movement":1,"temp":31.5}"#).unwrap();
        assert_eq!(signals.grinder, None);
        assert_eq!(signals.movement, Some(1));
    }

    #[test]
    fn test_decode_integral_floats() {
        let signals =
            Signals::from_frame(r#"{"belt_separator":1.0,"grinder":0.0,"movement":0.5}"#)
                .unwrap();
        assert_eq!(signals.belt_separator, Some(1));
        assert_eq!(signals.grinder, Some(0));
        assert_eq!(signals.movement, None);
    }

    #[test]
    fn test_decode_rejects_repeated_key() {
        assert!(Signals::from_frame(r#"{"grinder":1,"grinder":0}"#).is_err());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(Signals::from_frame("{not json}").is_err());
        assert!(Signals::from_frame("{\"grinder\":1").is_err());
    }

    #[test]
    fn test_baseline() {
        let state = DeviceState::baseline();
        assert_eq!(state.signals().belt_separator, Some(0));
        assert_eq!(state.signals().grinder, None);
        assert_eq!(state, DeviceState::default());
    }

    #[test]
    fn test_sticky_merge() {
        let mut state = DeviceState::baseline();
        state.merge(&Signals {
            clear_pet: Some(1),
            grinder: Some(1),
            ..Signals::default()
        });
        state.merge(&Signals {
            grinder: Some(0),
            ..Signals::default()
        });

        assert_eq!(state.signals().clear_pet, Some(1));
        assert_eq!(state.signals().grinder, Some(0));
        assert_eq!(state.signals().belt_separator, Some(0));

        state.reset();
        assert_eq!(state, DeviceState::baseline());
    }
}
