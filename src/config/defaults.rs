use super::*;

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.1.51".to_string(),
            port: 502,
            slave_id: 1,
            request_timeout_seconds: 20,
            max_request_retries: 5,
            settle_delay_ms: 3000,
        }
    }
}

// SUN2000 register map (Modbus interface definitions)
impl Default for RegistersConfig {
    fn default() -> Self {
        Self {
            meter_status: 37100,
            meter_active_power: 37113,
            battery_state_of_charge: 37760,
            battery_running_status: 37762,
            battery_charge_discharge_power: 37765,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            positive_margin_watts: 100,
            negative_margin_watts: -20,
            on_hysteresis: 4,
            off_hysteresis: 2,
            excess_policy: ExcessPolicy::default(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 30,
            // 20 attempts 30 s apart: about ten minutes of dongle reboots
            max_connect_attempts: 20,
            connect_retry_delay_seconds: 30,
            slow_read_warning_seconds: 100,
            max_cycles: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/helios.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inverter: InverterConfig::default(),
            registers: RegistersConfig::default(),
            scheduler: SchedulerConfig::default(),
            control: ControlConfig::default(),
            devices: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}
