//! # Helios - Excess Solar Power Load Scheduler
//!
//! Measures the power balance of a Huawei SUN2000 installation (grid meter and
//! battery, read over Modbus TCP) and switches flexible loads such as heaters
//! on and off so that surplus solar power is consumed locally instead of being
//! exported.
//!
//! ## Architecture
//!
//! - `registers`: register window arithmetic and big-endian decoders
//! - `modbus`: Modbus TCP transport with per-call timeouts and retries
//! - `measurement`: typed meter and battery readings, one bulk read each
//! - `excess`: grid and battery power reduced to one excess power value
//! - `scheduler`: hysteresis decisions over an explicit scheduler context
//! - `device`: the switchable device capability and the Shelly relay actuator
//! - `control`: cadence, reconnect backoff and per-cycle error containment
//! - `config`: YAML configuration and validation
//! - `logging`: structured logging and tracing

pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod excess;
pub mod logging;
pub mod measurement;
pub mod modbus;
pub mod registers;
pub mod scheduler;

// Re-export commonly used types
pub use config::Config;
pub use control::{ControlLoop, LoopSettings, LoopStats};
pub use error::{HeliosError, Result};
pub use excess::{ExcessPolicy, ExcessPower};
pub use scheduler::{HysteresisScheduler, HysteresisSettings, SchedulerContext};
