//! Configuration management for Helios
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. Every section falls back to its defaults, so a
//! deployment file only needs to list what differs (usually the inverter address
//! and the devices).

use crate::error::{HeliosError, Result};
use crate::excess::ExcessPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod defaults;

/// Largest number of registers a single Modbus read may request
pub const MAX_REGISTERS_PER_READ: u16 = 125;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "HELIOS_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Modbus TCP connection to the inverter
    pub inverter: InverterConfig,

    /// Register address mappings
    pub registers: RegistersConfig,

    /// Hysteresis thresholds and excess power policy
    pub scheduler: SchedulerConfig,

    /// Control loop cadence and resilience
    pub control: ControlConfig,

    /// Schedulable devices in priority order (first on, last off)
    pub devices: Vec<DeviceConfig>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Modbus TCP connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InverterConfig {
    /// IP address or host name of the inverter (or its dongle)
    pub ip: String,

    /// TCP port (typically 502)
    pub port: u16,

    /// Modbus unit id
    pub slave_id: u8,

    /// Timeout for connecting and for each register read
    pub request_timeout_seconds: u64,

    /// Attempts per register read before giving up on it
    pub max_request_retries: u32,

    /// Wait after connecting before the first request.
    /// The SUN2000 rejects traffic sent right after the accept.
    pub settle_delay_ms: u64,
}

/// Modbus register address mappings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistersConfig {
    /// Power meter status (u16)
    pub meter_status: u16,

    /// Power meter active power in W (i32, +feed-in/-import)
    pub meter_active_power: u16,

    /// Battery state of charge in 0.1% (u16)
    pub battery_state_of_charge: u16,

    /// Battery running status (u16)
    pub battery_running_status: u16,

    /// Battery charge/discharge power in W (i32, +charge/-discharge)
    pub battery_charge_discharge_power: u16,
}

/// Scheduler thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Surplus that must be exceeded before any load is considered
    pub positive_margin_watts: i64,

    /// Deficit that must be exceeded (negative) before loads are shed
    pub negative_margin_watts: i64,

    /// Consecutive qualifying cycles before a device is turned on
    pub on_hysteresis: u32,

    /// Consecutive deficit cycles before a device is turned off
    pub off_hysteresis: u32,

    /// How battery charging counts towards excess power
    pub excess_policy: ExcessPolicy,
}

/// Control loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Interval between cycle starts
    pub poll_interval_seconds: u64,

    /// Connect attempts per cycle before the cycle is given up
    pub max_connect_attempts: u32,

    /// Delay between connect attempts
    pub connect_retry_delay_seconds: u64,

    /// Reads slower than this are logged as transport degradation
    pub slow_read_warning_seconds: u64,

    /// Stop after this many cycles (run until signalled when absent)
    pub max_cycles: Option<u64>,
}

/// A schedulable device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device name
    pub name: String,

    /// Rated power draw when on
    pub wattage: u32,

    /// How the device is switched
    pub actuator: ActuatorConfig,
}

/// Actuator kinds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActuatorConfig {
    /// Shelly relay switched over its HTTP API
    ShellyRelay {
        /// Host (optionally host:port) of the relay
        host: String,

        /// Relay channel
        #[serde(default)]
        channel: u8,

        /// HTTP request timeout
        #[serde(default = "default_relay_timeout_seconds")]
        timeout_seconds: u64,
    },
}

fn default_relay_timeout_seconds() -> u64 {
    5
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file (its directory receives daily rotated files)
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl InverterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl ControlConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_secs(self.connect_retry_delay_seconds)
    }

    pub fn slow_read_threshold(&self) -> Duration {
        Duration::from_secs(self.slow_read_warning_seconds)
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from an explicit path, `HELIOS_CONFIG`, or the default locations
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Self::from_file(PathBuf::from(path));
        }

        let default_paths = ["helios.yaml", "/etc/helios/config.yaml"];
        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        // Fall back to default configuration
        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.inverter.ip.is_empty() {
            return Err(HeliosError::validation(
                "inverter.ip",
                "IP address cannot be empty",
            ));
        }

        if self.inverter.port == 0 {
            return Err(HeliosError::validation(
                "inverter.port",
                "Port must be greater than 0",
            ));
        }

        if self.inverter.request_timeout_seconds == 0 {
            return Err(HeliosError::validation(
                "inverter.request_timeout_seconds",
                "Must be greater than 0",
            ));
        }

        if self.inverter.max_request_retries == 0 {
            return Err(HeliosError::validation(
                "inverter.max_request_retries",
                "Must be at least 1",
            ));
        }

        if self.inverter.settle_delay_ms < 2000 {
            return Err(HeliosError::validation(
                "inverter.settle_delay_ms",
                "Inverter needs at least 2000 ms after connecting",
            ));
        }

        self.registers.validate()?;

        if self.scheduler.negative_margin_watts > self.scheduler.positive_margin_watts {
            return Err(HeliosError::validation(
                "scheduler.negative_margin_watts",
                "Must not exceed positive_margin_watts",
            ));
        }

        if self.scheduler.on_hysteresis == 0 {
            return Err(HeliosError::validation(
                "scheduler.on_hysteresis",
                "Must be at least 1",
            ));
        }

        if self.scheduler.off_hysteresis == 0 {
            return Err(HeliosError::validation(
                "scheduler.off_hysteresis",
                "Must be at least 1",
            ));
        }

        if self.control.poll_interval_seconds == 0 {
            return Err(HeliosError::validation(
                "control.poll_interval_seconds",
                "Must be greater than 0",
            ));
        }

        if self.control.max_connect_attempts == 0 {
            return Err(HeliosError::validation(
                "control.max_connect_attempts",
                "Must be at least 1",
            ));
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(HeliosError::validation(
                    "devices.name",
                    "Device name cannot be empty",
                ));
            }
            if !names.insert(device.name.as_str()) {
                return Err(HeliosError::validation(
                    "devices.name".to_string(),
                    format!("Duplicate device name '{}'", device.name),
                ));
            }
            if device.wattage == 0 {
                return Err(HeliosError::validation(
                    "devices.wattage".to_string(),
                    format!("Device '{}' must have a positive wattage", device.name),
                ));
            }
            match &device.actuator {
                ActuatorConfig::ShellyRelay { host, .. } if host.trim().is_empty() => {
                    return Err(HeliosError::validation(
                        "devices.actuator.host".to_string(),
                        format!("Device '{}' has no relay host", device.name),
                    ));
                }
                ActuatorConfig::ShellyRelay { .. } => {}
            }
        }

        Ok(())
    }
}

impl RegistersConfig {
    /// Register/width pairs decoded from the meter read
    pub fn meter_values(&self) -> [(u16, usize); 2] {
        [(self.meter_status, 2), (self.meter_active_power, 4)]
    }

    /// Register/width pairs decoded from the battery read
    pub fn battery_values(&self) -> [(u16, usize); 3] {
        [
            (self.battery_state_of_charge, 2),
            (self.battery_running_status, 2),
            (self.battery_charge_discharge_power, 4),
        ]
    }

    fn validate(&self) -> Result<()> {
        let meter = self.meter_values();
        let battery = self.battery_values();
        let windows: [(&str, &[(u16, usize)]); 2] = [
            ("registers.meter", &meter[..]),
            ("registers.battery", &battery[..]),
        ];
        for (field, values) in windows {
            let first = values.iter().map(|(r, _)| *r).min().unwrap_or(0);
            let end = values
                .iter()
                .map(|(r, w)| u32::from(*r) + (*w as u32).div_ceil(2))
                .max()
                .unwrap_or(0);
            if end > u32::from(u16::MAX) + 1 {
                return Err(HeliosError::validation(
                    field,
                    "Register window exceeds the address space",
                ));
            }
            if end - u32::from(first) > u32::from(MAX_REGISTERS_PER_READ) {
                return Err(HeliosError::validation(
                    field.to_string(),
                    format!(
                        "Register window spans more than {} registers",
                        MAX_REGISTERS_PER_READ
                    ),
                ));
            }
        }
        Ok(())
    }
}
