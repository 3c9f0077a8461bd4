//! Bridge configuration.
//!
//! Everything here is supplied by the host process; the bridge only reads it.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::transport::serial::DEFAULT_BAUD_RATE;
use crate::transport::{LinkTarget, SerialConfig, SimulatorConfig, SimulatorMode};

/// Default real-time page hardware events are published to.
pub const DEFAULT_PAGE: &str = "recycle";

/// Default log verbosity.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration consumed by the bridge.
///
/// Deserializes from a partial object; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Whether hardware support is enabled at all.
    pub hardware_enabled: bool,
    /// Serial port of the controller.
    pub port: Option<String>,
    /// Baud rate.
    pub baud_rate: u32,
    /// Log verbosity (an `EnvFilter` directive).
    pub log_level: String,
    /// Running in production; a missing port is then an error.
    pub production: bool,
    /// Real-time page for hardware events.
    pub page: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            hardware_enabled: true,
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            log_level: DEFAULT_LOG_LEVEL.to_owned(),
            production: false,
            page: DEFAULT_PAGE.to_owned(),
        }
    }
}

impl BridgeConfig {
    /// Reads the configuration from the process environment.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `HARDWARE_ENABLED` | `hardware_enabled` (`true`/`false`, `1`/`0`, `yes`/`no`) |
    /// | `SERIAL_PORT` | `port` |
    /// | `SERIAL_BAUD_RATE` | `baud_rate` |
    /// | `LOG_LEVEL` | `log_level` |
    /// | `APP_ENV` | `production` when set to `production` |
    /// | `REALTIME_PAGE` | `page` |
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Reads the configuration from key/value pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let value: String = value.into();
            let value = value.trim();
            match key.as_ref() {
                "HARDWARE_ENABLED" => config.hardware_enabled = parse_flag(value)?,
                "SERIAL_PORT" if !value.is_empty() => config.port = Some(value.to_owned()),
                "SERIAL_BAUD_RATE" => {
                    config.baud_rate = value.parse().map_err(|_| Error::Config {
                        reason: format!("SERIAL_BAUD_RATE is not a number: {value:?}"),
                    })?;
                }
                "LOG_LEVEL" if !value.is_empty() => config.log_level = value.to_owned(),
                "APP_ENV" => config.production = value.eq_ignore_ascii_case("production"),
                "REALTIME_PAGE" if !value.is_empty() => config.page = value.to_owned(),
                _ => {}
            }
        }

        Ok(config)
    }

    /// Sets the serial port.
    #[must_use]
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Enables or disables hardware support.
    #[must_use]
    pub const fn hardware_enabled(mut self, enabled: bool) -> Self {
        self.hardware_enabled = enabled;
        self
    }

    /// Marks the configuration as production.
    #[must_use]
    pub const fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// Chooses the link the bridge should use.
    pub fn link_target(&self) -> Result<LinkTarget> {
        if !self.hardware_enabled {
            return Ok(LinkTarget::Simulated(SimulatorConfig::new(SimulatorMode::Idle)));
        }

        match &self.port {
            Some(port) => Ok(LinkTarget::Serial(
                SerialConfig::new(port.clone()).baud_rate(self.baud_rate),
            )),
            None if self.production => Err(Error::Config {
                reason: "SERIAL_PORT is required in production".into(),
            }),
            None => Ok(LinkTarget::Simulated(SimulatorConfig::new(
                SimulatorMode::Scripted,
            ))),
        }
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config {
            reason: format!("HARDWARE_ENABLED is not a boolean: {value:?}"),
        }),
    }
}
