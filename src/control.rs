//! Control loop
//!
//! Drives measurement, excess power calculation and scheduling at a fixed
//! cadence on a single task. Every per-cycle failure is contained: the cycle
//! falls back to unknown excess power, which the scheduler ignores. Only a
//! configuration-class error stops the loop.

use crate::config::Config;
use crate::error::Result;
use crate::excess::{self, ExcessPolicy, ExcessPower};
use crate::logging::{StructuredLogger, get_logger};
use crate::measurement::MeasurementClient;
use crate::scheduler::{HysteresisScheduler, SchedulerContext, Transition};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

mod ticker;

pub use ticker::Ticker;

/// Cadence and resilience settings of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopSettings {
    pub poll_interval: Duration,
    pub max_connect_attempts: u32,
    pub connect_retry_delay: Duration,
    pub slow_read_threshold: Duration,
    pub excess_policy: ExcessPolicy,
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.control.poll_interval(),
            max_connect_attempts: config.control.max_connect_attempts.max(1),
            connect_retry_delay: config.control.connect_retry_delay(),
            slow_read_threshold: config.control.slow_read_threshold(),
            excess_policy: config.scheduler.excess_policy,
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Counters reported when the loop ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub total_cycles: u64,
    pub failed_reads: u64,
    pub slow_reads: u64,
    pub transitions: u64,
}

/// Outcome of one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub excess: ExcessPower,
    pub read_duration: Duration,
    pub transition: Option<Transition>,
    pub negative_streak: u32,
}

pub struct ControlLoop {
    client: MeasurementClient,
    scheduler: HysteresisScheduler,
    context: SchedulerContext,
    settings: LoopSettings,
    shutdown: watch::Receiver<bool>,
    stats: LoopStats,
    logger: StructuredLogger,
}

impl ControlLoop {
    pub fn new(
        client: MeasurementClient,
        scheduler: HysteresisScheduler,
        context: SchedulerContext,
        settings: LoopSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            scheduler,
            context,
            settings,
            shutdown,
            stats: LoopStats::default(),
            logger: get_logger("control"),
        }
    }

    pub fn stats(&self) -> LoopStats {
        self.stats
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.context
    }

    pub fn client(&self) -> &MeasurementClient {
        &self.client
    }

    /// Run until shutdown, or until `max_cycles` cycles have completed.
    ///
    /// The measurement client is disconnected before returning, also on error.
    pub async fn run(&mut self, max_cycles: Option<u64>) -> Result<LoopStats> {
        match max_cycles {
            Some(max) => self
                .logger
                .info(&format!("Starting control loop for {} cycles", max)),
            None => self.logger.info("Starting control loop"),
        }

        self.initialize_devices().await;
        let result = self.run_cycles(max_cycles).await;
        self.client.disconnect().await;

        match &result {
            Ok(()) => self.logger.info(&format!(
                "Control loop stopped after {} cycles ({} failed reads, {} slow reads, {} transitions)",
                self.stats.total_cycles,
                self.stats.failed_reads,
                self.stats.slow_reads,
                self.stats.transitions
            )),
            Err(e) => self
                .logger
                .error(&format!("Control loop aborted: {}", e)),
        }
        result.map(|()| self.stats)
    }

    async fn run_cycles(&mut self, max_cycles: Option<u64>) -> Result<()> {
        let mut ticker = Ticker::new(self.settings.poll_interval);

        loop {
            if max_cycles.is_some_and(|max| self.stats.total_cycles >= max) {
                return Ok(());
            }

            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => {
                    self.logger.info("Shutdown signal received");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            self.run_cycle().await?;
        }
    }

    /// Record the reported state of every device
    pub async fn initialize_devices(&mut self) {
        self.context.refresh_all(self.scheduler.logger()).await;
        for device in self.context.devices() {
            self.logger.info(&format!(
                "Device {} ({} W) is {}",
                device.name(),
                device.wattage(),
                device.state()
            ));
        }
    }

    /// One read-compute-schedule pass
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let started = Instant::now();
        let excess = self.read_excess_power().await?;
        let read_duration = started.elapsed();

        let transition = self.scheduler.schedule(&mut self.context, excess).await;

        self.stats.total_cycles += 1;
        if transition.is_some() {
            self.stats.transitions += 1;
        }

        self.logger.info(&format!(
            "{} excess power: {}, negative streak: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            excess,
            self.context.negative_streak()
        ));

        Ok(CycleReport {
            cycle: self.stats.total_cycles,
            excess,
            read_duration,
            transition,
            negative_streak: self.context.negative_streak(),
        })
    }

    /// Read meter and battery and combine them.
    ///
    /// Recoverable failures yield [`ExcessPower::Unknown`]; configuration-class
    /// failures are returned. The slow-read check covers reconnecting too.
    pub async fn read_excess_power(&mut self) -> Result<ExcessPower> {
        let started = Instant::now();
        let connected = self.ensure_connection().await;
        let readings = if connected {
            Some(self.read_measurements().await)
        } else {
            None
        };
        self.check_read_duration(started.elapsed());

        let Some(readings) = readings else {
            self.stats.failed_reads += 1;
            return Ok(ExcessPower::Unknown);
        };

        match readings {
            Ok((meter, battery)) => {
                self.logger.debug(&format!(
                    "Meter {} {} W, battery {} {} W",
                    meter.status,
                    meter.active_power_watts,
                    battery.status,
                    battery.charge_discharge_power_watts
                ));
                let excess = excess::from_readings(&meter, &battery, self.settings.excess_policy);
                if excess.is_unknown() {
                    self.logger.info(&format!(
                        "Excess power unavailable (meter {}, battery {})",
                        meter.status, battery.status
                    ));
                }
                Ok(excess)
            }
            Err(e) if !e.is_recoverable() => Err(e),
            Err(e) => {
                self.stats.failed_reads += 1;
                self.logger.warn(&format!("Reading failed: {}", e));
                Ok(ExcessPower::Unknown)
            }
        }
    }

    fn check_read_duration(&mut self, elapsed: Duration) {
        if elapsed > self.settings.slow_read_threshold {
            self.stats.slow_reads += 1;
            self.logger.warn(&format!(
                "Reading the inverter took {:.1}s (threshold {}s)",
                elapsed.as_secs_f64(),
                self.settings.slow_read_threshold.as_secs()
            ));
        }
    }

    async fn read_measurements(
        &mut self,
    ) -> Result<(crate::measurement::MeterReading, crate::measurement::BatteryReading)> {
        let meter = self.client.read_power_meter().await?;
        let battery = self.client.read_battery().await?;
        Ok((meter, battery))
    }

    /// Make sure the client is connected, retrying a bounded number of times.
    ///
    /// Returns `false` when every attempt failed or shutdown was requested.
    pub async fn ensure_connection(&mut self) -> bool {
        if self.client.is_connected() {
            return true;
        }

        let max_attempts = self.settings.max_connect_attempts;
        for attempt in 1..=max_attempts {
            if *self.shutdown.borrow() {
                return false;
            }
            if self.client.connect().await {
                return true;
            }
            if attempt == max_attempts {
                break;
            }

            self.logger.warn(&format!(
                "Connect attempt {}/{} failed, retrying in {}s",
                attempt,
                max_attempts,
                self.settings.connect_retry_delay.as_secs()
            ));
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => return false,
                _ = tokio::time::sleep(self.settings.connect_retry_delay) => {}
            }
        }

        self.logger.error(&format!(
            "Giving up on the inverter after {} connect attempts",
            max_attempts
        ));
        false
    }
}

/// Resolves once shutdown is requested; never if the sender is gone
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
