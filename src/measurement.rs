//! Typed meter and battery readings from the inverter
//!
//! Each reading type is fetched with a single bulk register read spanning all
//! of its values. The SUN2000 answers slowly and drops requests, so one
//! round-trip per reading keeps the read phase short.

use crate::config::{InverterConfig, RegistersConfig};
use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::modbus::{ModbusClient, RegisterTransport};
use crate::registers::{RegisterResponse, RegisterWindow};
use std::fmt;
use std::time::Duration;

/// Power meter status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterStatus {
    Offline,
    Online,
    /// Code outside of the documented table
    Unknown(u16),
}

impl MeterStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => MeterStatus::Offline,
            1 => MeterStatus::Online,
            other => MeterStatus::Unknown(other),
        }
    }
}

/// Battery running status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryStatus {
    Offline,
    Standby,
    Running,
    Fault,
    SleepMode,
    /// Code outside of the documented table
    Unknown(u16),
}

impl BatteryStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            0 => BatteryStatus::Offline,
            1 => BatteryStatus::Standby,
            2 => BatteryStatus::Running,
            3 => BatteryStatus::Fault,
            4 => BatteryStatus::SleepMode,
            other => BatteryStatus::Unknown(other),
        }
    }
}

impl fmt::Display for MeterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeterStatus::Offline => write!(f, "offline"),
            MeterStatus::Online => write!(f, "online"),
            MeterStatus::Unknown(code) => write!(f, "unknown ({})", code),
        }
    }
}

impl fmt::Display for BatteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatteryStatus::Offline => write!(f, "offline"),
            BatteryStatus::Standby => write!(f, "standby"),
            BatteryStatus::Running => write!(f, "running"),
            BatteryStatus::Fault => write!(f, "fault"),
            BatteryStatus::SleepMode => write!(f, "sleep mode"),
            BatteryStatus::Unknown(code) => write!(f, "unknown ({})", code),
        }
    }
}

/// Grid meter reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeterReading {
    pub status: MeterStatus,
    /// +feed to grid / -import from grid
    pub active_power_watts: i32,
}

impl MeterReading {
    /// Decode from a bulk read covering the meter registers
    pub fn decode(registers: &RegistersConfig, response: &RegisterResponse) -> Result<Self> {
        let status = response.uint(registers.meter_status, 2)? as u16;
        let power = response.int(registers.meter_active_power, 4)? as i32;
        Ok(Self {
            status: MeterStatus::from_code(status),
            active_power_watts: power,
        })
    }

    /// Grid power, if the meter is online
    pub fn grid_power(&self) -> Option<i32> {
        (self.status == MeterStatus::Online).then_some(self.active_power_watts)
    }
}

/// Battery reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReading {
    pub status: BatteryStatus,
    /// +charging / -discharging
    pub charge_discharge_power_watts: i32,
    /// None when the register holds an impossible value
    pub state_of_charge_percent: Option<f32>,
}

impl BatteryReading {
    /// Decode from a bulk read covering the battery registers
    pub fn decode(registers: &RegistersConfig, response: &RegisterResponse) -> Result<Self> {
        let soc_raw = response.uint(registers.battery_state_of_charge, 2)?;
        let status = response.uint(registers.battery_running_status, 2)? as u16;
        let power = response.int(registers.battery_charge_discharge_power, 4)? as i32;

        // Register holds tenths of a percent
        let soc = soc_raw as f32 / 10.0;
        Ok(Self {
            status: BatteryStatus::from_code(status),
            charge_discharge_power_watts: power,
            state_of_charge_percent: (0.0..=100.0).contains(&soc).then_some(soc),
        })
    }

    /// Battery power, if the battery is running
    pub fn battery_power(&self) -> Option<i32> {
        (self.status == BatteryStatus::Running).then_some(self.charge_discharge_power_watts)
    }
}

/// Client producing typed readings from a register transport
pub struct MeasurementClient {
    transport: Box<dyn RegisterTransport>,
    registers: RegistersConfig,
    meter_window: RegisterWindow,
    battery_window: RegisterWindow,
    settle_delay: Duration,
    logger: StructuredLogger,
}

impl MeasurementClient {
    /// Client over Modbus TCP using the inverter settings
    pub fn modbus(inverter: &InverterConfig, registers: &RegistersConfig) -> Result<Self> {
        Self::new(
            Box::new(ModbusClient::new(inverter)),
            registers.clone(),
            inverter.settle_delay(),
        )
    }

    /// Client over an arbitrary transport
    pub fn new(
        transport: Box<dyn RegisterTransport>,
        registers: RegistersConfig,
        settle_delay: Duration,
    ) -> Result<Self> {
        let meter_window = RegisterWindow::spanning(&registers.meter_values())?;
        let battery_window = RegisterWindow::spanning(&registers.battery_values())?;
        Ok(Self {
            transport,
            registers,
            meter_window,
            battery_window,
            settle_delay,
            logger: get_logger("inverter"),
        })
    }

    /// Open the connection and wait for the device to settle.
    ///
    /// Returns `true` when connected. Failures are logged, never raised.
    pub async fn connect(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }

        self.logger.info("Connecting to inverter...");
        if let Err(e) = self.transport.connect().await {
            self.logger
                .error(&format!("Inverter connection failed: {}", e));
            self.transport.disconnect().await;
            return false;
        }

        if !self.is_connected() {
            self.logger.error("Inverter connection failed!");
            return false;
        }

        self.logger.debug(&format!(
            "Waiting {:?} before first request",
            self.settle_delay
        ));
        tokio::time::sleep(self.settle_delay).await;
        self.logger.info("Successfully connected to inverter");
        true
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn disconnect(&mut self) {
        self.logger.info("Disconnecting from inverter...");
        self.transport.disconnect().await;
        self.logger.info("done.");
    }

    /// Read meter status and active power
    pub async fn read_power_meter(&mut self) -> Result<MeterReading> {
        let response = self.read_window(self.meter_window).await?;
        let reading = MeterReading::decode(&self.registers, &response)?;
        if let MeterStatus::Unknown(code) = reading.status {
            self.logger
                .warn(&format!("Unrecognized meter status code {}", code));
        }
        Ok(reading)
    }

    /// Read battery state of charge, running status and charge/discharge power
    pub async fn read_battery(&mut self) -> Result<BatteryReading> {
        let response = self.read_window(self.battery_window).await?;
        let reading = BatteryReading::decode(&self.registers, &response)?;
        if let BatteryStatus::Unknown(code) = reading.status {
            self.logger
                .warn(&format!("Unrecognized battery status code {}", code));
        }
        if reading.state_of_charge_percent.is_none() {
            self.logger.warn("Battery state of charge out of range");
        }
        Ok(reading)
    }

    async fn read_window(&mut self, window: RegisterWindow) -> Result<RegisterResponse> {
        let words = self
            .transport
            .read_holding_registers(window.first(), window.count())
            .await?;
        RegisterResponse::from_bytes(
            window.first(),
            crate::registers::frame_response(&words),
        )
    }
}
