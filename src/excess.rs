//! Excess power calculation
//!
//! Reduces the grid and battery power readings to the single signed value the
//! scheduler works on. Grid power is positive when feeding to the grid, battery
//! power is positive when charging.

use crate::measurement::{BatteryReading, MeterReading};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How battery charging counts towards excess power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExcessPolicy {
    /// Power flowing into the battery may be diverted to loads
    #[default]
    BatteryChargeIsSurplus,
    /// Power flowing into the battery stays with the battery
    BatteryChargeReserved,
}

/// Excess power in watts, or unknown when a reading is unavailable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcessPower {
    Watts(i64),
    Unknown,
}

impl ExcessPower {
    pub fn watts(&self) -> Option<i64> {
        match self {
            ExcessPower::Watts(w) => Some(*w),
            ExcessPower::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, ExcessPower::Unknown)
    }
}

impl fmt::Display for ExcessPower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExcessPower::Watts(w) => write!(f, "{} W", w),
            ExcessPower::Unknown => write!(f, "unknown"),
        }
    }
}

/// Combine grid and battery power into excess power.
///
/// Either input being `None` yields [`ExcessPower::Unknown`]. Battery discharge
/// always counts as a deficit.
pub fn compute(grid: Option<i32>, battery: Option<i32>, policy: ExcessPolicy) -> ExcessPower {
    let (Some(grid), Some(battery)) = (grid, battery) else {
        return ExcessPower::Unknown;
    };
    let grid = i64::from(grid);
    let battery = i64::from(battery);

    let watts = match policy {
        ExcessPolicy::BatteryChargeIsSurplus => grid + battery,
        ExcessPolicy::BatteryChargeReserved => grid + battery.min(0),
    };
    ExcessPower::Watts(watts)
}

/// Excess power from a meter and battery reading.
///
/// A meter that is not online or a battery that is not running makes the
/// result unknown.
pub fn from_readings(
    meter: &MeterReading,
    battery: &BatteryReading,
    policy: ExcessPolicy,
) -> ExcessPower {
    compute(meter.grid_power(), battery.battery_power(), policy)
}
