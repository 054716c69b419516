//! Schedulable devices
//!
//! A device is anything that can be switched on and off and reports a rated
//! power draw. The scheduler only sees the [`Switchable`] capability; the
//! concrete actuators live in submodules.

use crate::config::{ActuatorConfig, DeviceConfig};
use crate::error::Result;
use std::fmt;
use std::time::Duration;

pub mod shelly;

pub use shelly::ShellyRelay;

/// Last known device state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    /// Never queried, or the last control call failed
    #[default]
    Unknown,
    On,
    Off,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Unknown => write!(f, "unknown"),
            DeviceState::On => write!(f, "on"),
            DeviceState::Off => write!(f, "off"),
        }
    }
}

/// Device control capability
#[async_trait::async_trait]
pub trait Switchable: Send + Sync {
    /// Unique, stable device name
    fn name(&self) -> &str;

    /// Power draw when switched on, in watts
    fn rated_wattage(&self) -> u32;

    /// Switch on and return the resulting state
    async fn turn_on(&self) -> Result<DeviceState>;

    /// Switch off and return the resulting state
    async fn turn_off(&self) -> Result<DeviceState>;

    /// Ask the device for its current state
    async fn query_state(&self) -> Result<DeviceState>;
}

/// A device in the scheduler's priority list
pub struct ScheduledDevice {
    actuator: Box<dyn Switchable>,
    pub(crate) state: DeviceState,
    pub(crate) exceed_counter: u32,
}

impl ScheduledDevice {
    pub fn new(actuator: Box<dyn Switchable>) -> Self {
        Self {
            actuator,
            state: DeviceState::Unknown,
            exceed_counter: 0,
        }
    }

    pub fn name(&self) -> &str {
        self.actuator.name()
    }

    pub fn wattage(&self) -> u32 {
        self.actuator.rated_wattage()
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn exceed_counter(&self) -> u32 {
        self.exceed_counter
    }

    pub(crate) fn actuator(&self) -> &dyn Switchable {
        self.actuator.as_ref()
    }
}

impl fmt::Debug for ScheduledDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledDevice")
            .field("name", &self.name())
            .field("wattage", &self.wattage())
            .field("state", &self.state)
            .field("exceed_counter", &self.exceed_counter)
            .finish()
    }
}

/// Build the device list in configuration (priority) order
pub fn build_devices(configs: &[DeviceConfig]) -> Result<Vec<ScheduledDevice>> {
    configs
        .iter()
        .map(|config| {
            let actuator: Box<dyn Switchable> = match &config.actuator {
                ActuatorConfig::ShellyRelay {
                    host,
                    channel,
                    timeout_seconds,
                } => Box::new(ShellyRelay::new(
                    &config.name,
                    config.wattage,
                    host,
                    *channel,
                    Duration::from_secs(*timeout_seconds),
                )?),
            };
            Ok(ScheduledDevice::new(actuator))
        })
        .collect()
}
