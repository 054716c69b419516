//! Hysteresis scheduler
//!
//! Turns one excess power sample per cycle into at most one device transition.
//! Two tracks share the [`SchedulerContext`]:
//!
//! - surplus above the positive margin counts up the `exceed_counter` of the
//!   first device that is off; reaching the on-hysteresis turns it on and
//!   clears every device's counter
//! - deficit below the negative margin counts up the negative streak; reaching
//!   the off-hysteresis turns off the last device that is on
//!
//! A sample between the margins only clears the negative streak. An unknown
//! sample leaves everything untouched.

use crate::config::SchedulerConfig;
use crate::device::{DeviceState, ScheduledDevice};
use crate::excess::ExcessPower;
use crate::logging::{StructuredLogger, get_logger};
use std::fmt;

/// Thresholds fixed per deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HysteresisSettings {
    pub positive_margin_watts: i64,
    pub negative_margin_watts: i64,
    pub on_hysteresis: u32,
    pub off_hysteresis: u32,
}

impl From<&SchedulerConfig> for HysteresisSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            positive_margin_watts: config.positive_margin_watts,
            negative_margin_watts: config.negative_margin_watts,
            on_hysteresis: config.on_hysteresis,
            off_hysteresis: config.off_hysteresis,
        }
    }
}

impl Default for HysteresisSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

/// Mutable scheduler state, owned by the control loop
#[derive(Debug)]
pub struct SchedulerContext {
    devices: Vec<ScheduledDevice>,
    negative_streak: u32,
}

/// Comparable copy of the scheduler state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub devices: Vec<(String, DeviceState, u32)>,
    pub negative_streak: u32,
}

impl SchedulerContext {
    /// Context over devices in priority order (index 0 is first on, last off)
    pub fn new(devices: Vec<ScheduledDevice>) -> Self {
        Self {
            devices,
            negative_streak: 0,
        }
    }

    pub fn devices(&self) -> &[ScheduledDevice] {
        &self.devices
    }

    pub fn device(&self, name: &str) -> Option<&ScheduledDevice> {
        self.devices.iter().find(|d| d.name() == name)
    }

    pub fn negative_streak(&self) -> u32 {
        self.negative_streak
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            devices: self
                .devices
                .iter()
                .map(|d| (d.name().to_string(), d.state(), d.exceed_counter()))
                .collect(),
            negative_streak: self.negative_streak,
        }
    }

    /// Query every device and record its reported state.
    ///
    /// Devices that fail to answer are left `Unknown`.
    pub async fn refresh_all(&mut self, logger: &StructuredLogger) {
        for device in &mut self.devices {
            refresh(device, logger).await;
        }
    }

    /// Re-query only the devices whose state is not known
    async fn refresh_unknown(&mut self, logger: &StructuredLogger) {
        for device in self
            .devices
            .iter_mut()
            .filter(|d| d.state == DeviceState::Unknown)
        {
            refresh(device, logger).await;
        }
    }
}

async fn refresh(device: &mut ScheduledDevice, logger: &StructuredLogger) {
    match device.actuator().query_state().await {
        Ok(state) => {
            logger.debug(&format!("Device {} is {}", device.name(), state));
            device.state = state;
        }
        Err(e) => {
            logger.warn(&format!("Could not query {}: {}", device.name(), e));
            device.state = DeviceState::Unknown;
        }
    }
}

/// Requested switch direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl fmt::Display for Switch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Switch::On => write!(f, "on"),
            Switch::Off => write!(f, "off"),
        }
    }
}

/// A device transition performed by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub device: String,
    pub action: Switch,
    /// State after the call; `Unknown` when the actuator failed
    pub outcome: DeviceState,
}

impl Transition {
    pub fn succeeded(&self) -> bool {
        match self.action {
            Switch::On => self.outcome == DeviceState::On,
            Switch::Off => self.outcome == DeviceState::Off,
        }
    }
}

/// Stateless decision engine over a [`SchedulerContext`]
pub struct HysteresisScheduler {
    settings: HysteresisSettings,
    logger: StructuredLogger,
}

impl HysteresisScheduler {
    pub fn new(settings: HysteresisSettings) -> Self {
        Self {
            settings,
            logger: get_logger("scheduler"),
        }
    }

    pub fn settings(&self) -> &HysteresisSettings {
        &self.settings
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Process one sample; returns the transition performed, if any
    pub async fn schedule(
        &self,
        context: &mut SchedulerContext,
        excess: ExcessPower,
    ) -> Option<Transition> {
        let ExcessPower::Watts(p) = excess else {
            return None;
        };

        context.refresh_unknown(&self.logger).await;

        if p > self.settings.positive_margin_watts {
            context.negative_streak = 0;
            self.surplus(context, p).await
        } else if p < self.settings.negative_margin_watts {
            self.deficit(context).await
        } else {
            context.negative_streak = 0;
            None
        }
    }

    async fn surplus(&self, context: &mut SchedulerContext, p: i64) -> Option<Transition> {
        let index = context
            .devices
            .iter()
            .position(|d| d.state == DeviceState::Off)?;

        let device = &mut context.devices[index];
        if p.saturating_add(self.settings.positive_margin_watts) > i64::from(device.wattage()) {
            device.exceed_counter += 1;
            self.logger.debug(&format!(
                "Surplus {} W fits {} ({}/{})",
                p,
                device.name(),
                device.exceed_counter,
                self.settings.on_hysteresis
            ));
        }

        if device.exceed_counter < self.settings.on_hysteresis {
            return None;
        }

        let transition = self.switch(device, Switch::On).await;
        for device in &mut context.devices {
            device.exceed_counter = 0;
        }
        Some(transition)
    }

    async fn deficit(&self, context: &mut SchedulerContext) -> Option<Transition> {
        context.negative_streak += 1;
        if context.negative_streak < self.settings.off_hysteresis {
            return None;
        }

        context.negative_streak = 0;
        let device = context
            .devices
            .iter_mut()
            .rev()
            .find(|d| d.state == DeviceState::On)?;
        Some(self.switch(device, Switch::Off).await)
    }

    async fn switch(&self, device: &mut ScheduledDevice, action: Switch) -> Transition {
        let result = match action {
            Switch::On => device.actuator().turn_on().await,
            Switch::Off => device.actuator().turn_off().await,
        };

        device.state = match result {
            Ok(state) => {
                self.logger.info(&format!(
                    "Turned {} {} ({} W), device reports {}",
                    action,
                    device.name(),
                    device.wattage(),
                    state
                ));
                state
            }
            Err(e) => {
                self.logger.error(&format!(
                    "Failed to turn {} {}: {}",
                    action,
                    device.name(),
                    e
                ));
                DeviceState::Unknown
            }
        };

        Transition {
            device: device.name().to_string(),
            action,
            outcome: device.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Switchable;
    use crate::error::{HeliosError, Result};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct FakeRelay {
        name: String,
        wattage: u32,
        physical: Arc<Mutex<DeviceState>>,
        failing: Arc<AtomicBool>,
        queries: Arc<AtomicUsize>,
    }

    impl FakeRelay {
        fn new(name: &str, wattage: u32, state: DeviceState) -> Self {
            Self {
                name: name.to_string(),
                wattage,
                physical: Arc::new(Mutex::new(state)),
                failing: Arc::new(AtomicBool::new(false)),
                queries: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn set(&self, state: DeviceState) -> Result<DeviceState> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(HeliosError::actuator(self.name.as_str(), "offline"));
            }
            *self.physical.lock().unwrap() = state;
            Ok(state)
        }
    }

    #[async_trait::async_trait]
    impl Switchable for FakeRelay {
        fn name(&self) -> &str {
            &self.name
        }

        fn rated_wattage(&self) -> u32 {
            self.wattage
        }

        async fn turn_on(&self) -> Result<DeviceState> {
            self.set(DeviceState::On)
        }

        async fn turn_off(&self) -> Result<DeviceState> {
            self.set(DeviceState::Off)
        }

        async fn query_state(&self) -> Result<DeviceState> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(HeliosError::actuator(self.name.as_str(), "offline"));
            }
            Ok(*self.physical.lock().unwrap())
        }
    }

    async fn context(relays: &[FakeRelay]) -> SchedulerContext {
        let devices = relays
            .iter()
            .map(|r| ScheduledDevice::new(Box::new(r.clone())))
            .collect();
        let mut context = SchedulerContext::new(devices);
        context.refresh_all(&get_logger("test")).await;
        context
    }

    fn scheduler() -> HysteresisScheduler {
        HysteresisScheduler::new(HysteresisSettings::default())
    }

    #[test]
    fn test_settings_from_config() {
        let settings = HysteresisSettings::default();
        assert_eq!(settings.positive_margin_watts, 100);
        assert_eq!(settings.negative_margin_watts, -20);
        assert_eq!(settings.on_hysteresis, 4);
        assert_eq!(settings.off_hysteresis, 2);
    }

    #[tokio::test]
    async fn test_surplus_turns_on_first_off_device() {
        let a = FakeRelay::new("a", 800, DeviceState::Off);
        let b = FakeRelay::new("b", 1800, DeviceState::Off);
        let mut ctx = context(&[a, b]).await;
        let scheduler = scheduler();

        for cycle in 1..=3 {
            assert_eq!(scheduler.schedule(&mut ctx, ExcessPower::Watts(2000)).await, None);
            assert_eq!(ctx.devices()[0].exceed_counter(), cycle);
            assert_eq!(ctx.devices()[1].exceed_counter(), 0);
        }

        let transition = scheduler
            .schedule(&mut ctx, ExcessPower::Watts(2000))
            .await
            .unwrap();
        assert_eq!(transition.device, "a");
        assert_eq!(transition.action, Switch::On);
        assert!(transition.succeeded());
        assert_eq!(ctx.devices()[0].state(), DeviceState::On);
        assert_eq!(ctx.devices()[1].state(), DeviceState::Off);
        assert!(ctx.devices().iter().all(|d| d.exceed_counter() == 0));
    }

    #[tokio::test]
    async fn test_extreme_margin_and_surplus_do_not_overflow() {
        let a = FakeRelay::new("a", 800, DeviceState::Off);
        let mut ctx = context(&[a]).await;
        let scheduler = HysteresisScheduler::new(HysteresisSettings {
            positive_margin_watts: i64::MAX / 2 + 1,
            ..HysteresisSettings::default()
        });

        assert_eq!(scheduler.schedule(&mut ctx, ExcessPower::Watts(i64::MAX)).await, None);
        assert_eq!(ctx.devices()[0].exceed_counter(), 1);
    }

    #[tokio::test]
    async fn test_device_too_large_blocks_later_devices() {
        let big = FakeRelay::new("big", 3000, DeviceState::Off);
        let small = FakeRelay::new("small", 100, DeviceState::Off);
        let mut ctx = context(&[big, small]).await;
        let scheduler = scheduler();

        for _ in 0..10 {
            assert_eq!(scheduler.schedule(&mut ctx, ExcessPower::Watts(500)).await, None);
        }
        assert_eq!(ctx.devices()[0].exceed_counter(), 0);
        assert_eq!(ctx.devices()[1].exceed_counter(), 0);
        assert_eq!(ctx.devices()[1].state(), DeviceState::Off);
    }

    #[tokio::test]
    async fn test_deficit_turns_off_last_on_device() {
        let a = FakeRelay::new("a", 800, DeviceState::On);
        let b = FakeRelay::new("b", 1800, DeviceState::On);
        let mut ctx = context(&[a, b]).await;
        let scheduler = scheduler();

        assert_eq!(scheduler.schedule(&mut ctx, ExcessPower::Watts(-50)).await, None);
        assert_eq!(ctx.negative_streak(), 1);

        let transition = scheduler
            .schedule(&mut ctx, ExcessPower::Watts(-50))
            .await
            .unwrap();
        assert_eq!(transition.device, "b");
        assert_eq!(transition.action, Switch::Off);
        assert_eq!(ctx.negative_streak(), 0);
        assert_eq!(ctx.devices()[0].state(), DeviceState::On);
        assert_eq!(ctx.devices()[1].state(), DeviceState::Off);
    }

    #[tokio::test]
    async fn test_deficit_without_on_device_resets_streak() {
        let a = FakeRelay::new("a", 800, DeviceState::Off);
        let mut ctx = context(&[a]).await;
        let scheduler = scheduler();

        assert_eq!(scheduler.schedule(&mut ctx, ExcessPower::Watts(-500)).await, None);
        assert_eq!(ctx.negative_streak(), 1);
        assert_eq!(scheduler.schedule(&mut ctx, ExcessPower::Watts(-500)).await, None);
        assert_eq!(ctx.negative_streak(), 0);
    }

    #[tokio::test]
    async fn test_dead_zone_only_resets_streak() {
        let a = FakeRelay::new("a", 800, DeviceState::Off);
        let mut ctx = context(&[a]).await;
        let scheduler = scheduler();

        scheduler.schedule(&mut ctx, ExcessPower::Watts(2000)).await;
        scheduler.schedule(&mut ctx, ExcessPower::Watts(-100)).await;
        assert_eq!(ctx.devices()[0].exceed_counter(), 1);
        assert_eq!(ctx.negative_streak(), 1);

        for p in [-20, 0, 100] {
            assert_eq!(scheduler.schedule(&mut ctx, ExcessPower::Watts(p)).await, None);
            assert_eq!(ctx.negative_streak(), 0);
            assert_eq!(ctx.devices()[0].exceed_counter(), 1);
        }
    }

    #[tokio::test]
    async fn test_unknown_is_a_no_op() {
        let a = FakeRelay::new("a", 800, DeviceState::Off);
        let queries = a.queries.clone();
        let mut ctx = context(&[a]).await;
        let scheduler = scheduler();

        scheduler.schedule(&mut ctx, ExcessPower::Watts(-100)).await;
        ctx.devices[0].state = DeviceState::Unknown;
        let before = ctx.snapshot();
        let queried = queries.load(Ordering::SeqCst);

        assert_eq!(scheduler.schedule(&mut ctx, ExcessPower::Unknown).await, None);
        assert_eq!(ctx.snapshot(), before);
        assert_eq!(queries.load(Ordering::SeqCst), queried);
    }

    #[tokio::test]
    async fn test_actuator_failure_leaves_device_unknown() {
        let a = FakeRelay::new("a", 800, DeviceState::Off);
        let failing = a.failing.clone();
        let mut ctx = context(&[a]).await;
        let settings = HysteresisSettings {
            on_hysteresis: 1,
            ..Default::default()
        };
        let scheduler = HysteresisScheduler::new(settings);

        failing.store(true, Ordering::SeqCst);
        let transition = scheduler
            .schedule(&mut ctx, ExcessPower::Watts(2000))
            .await
            .unwrap();
        assert_eq!(transition.outcome, DeviceState::Unknown);
        assert!(!transition.succeeded());
        assert_eq!(ctx.devices()[0].state(), DeviceState::Unknown);

        // Still unreachable: device is skipped
        assert_eq!(scheduler.schedule(&mut ctx, ExcessPower::Watts(2000)).await, None);
        assert_eq!(ctx.devices()[0].state(), DeviceState::Unknown);

        // Back online: the query restores the baseline before evaluating
        failing.store(false, Ordering::SeqCst);
        let transition = scheduler
            .schedule(&mut ctx, ExcessPower::Watts(2000))
            .await
            .unwrap();
        assert!(transition.succeeded());
        assert_eq!(ctx.devices()[0].state(), DeviceState::On);
    }

    #[tokio::test]
    async fn test_at_most_one_transition_per_cycle() {
        let relays: Vec<FakeRelay> = (0..4)
            .map(|i| FakeRelay::new(&format!("d{}", i), 100, DeviceState::Off))
            .collect();
        let mut ctx = context(&relays).await;
        let settings = HysteresisSettings {
            on_hysteresis: 1,
            ..Default::default()
        };
        let scheduler = HysteresisScheduler::new(settings);

        for expected_on in 1..=4 {
            scheduler.schedule(&mut ctx, ExcessPower::Watts(10_000)).await;
            let on = ctx
                .devices()
                .iter()
                .filter(|d| d.state() == DeviceState::On)
                .count();
            assert_eq!(on, expected_on);
        }
        assert!(ctx.devices().iter().all(|d| d.state() == DeviceState::On));
    }
}
