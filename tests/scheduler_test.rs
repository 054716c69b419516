use helios::device::{DeviceState, ScheduledDevice, Switchable};
use helios::error::{HeliosError, Result};
use helios::excess::ExcessPower;
use helios::logging::get_logger;
use helios::scheduler::{HysteresisScheduler, HysteresisSettings, SchedulerContext, Switch};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct Relay {
    name: String,
    wattage: u32,
    state: Mutex<DeviceState>,
    switches: Arc<AtomicUsize>,
    reachable: bool,
}

impl Relay {
    fn boxed(name: &str, wattage: u32, state: DeviceState, switches: &Arc<AtomicUsize>) -> Box<Self> {
        Box::new(Self {
            name: name.to_string(),
            wattage,
            state: Mutex::new(state),
            switches: switches.clone(),
            reachable: true,
        })
    }

    fn apply(&self, state: DeviceState) -> Result<DeviceState> {
        self.switches.fetch_add(1, Ordering::SeqCst);
        if !self.reachable {
            return Err(HeliosError::actuator(self.name.as_str(), "timeout"));
        }
        *self.state.lock().unwrap() = state;
        Ok(state)
    }
}

#[async_trait::async_trait]
impl Switchable for Relay {
    fn name(&self) -> &str {
        &self.name
    }

    fn rated_wattage(&self) -> u32 {
        self.wattage
    }

    async fn turn_on(&self) -> Result<DeviceState> {
        self.apply(DeviceState::On)
    }

    async fn turn_off(&self) -> Result<DeviceState> {
        self.apply(DeviceState::Off)
    }

    async fn query_state(&self) -> Result<DeviceState> {
        if !self.reachable {
            return Err(HeliosError::actuator(self.name.as_str(), "timeout"));
        }
        Ok(*self.state.lock().unwrap())
    }
}

async fn context_with(devices: Vec<Box<Relay>>) -> SchedulerContext {
    let devices = devices
        .into_iter()
        .map(|relay| ScheduledDevice::new(relay))
        .collect();
    let mut ctx = SchedulerContext::new(devices);
    ctx.refresh_all(&get_logger("test")).await;
    ctx
}

#[tokio::test]
async fn sustained_surplus_turns_on_earliest_device() {
    let switches = Arc::new(AtomicUsize::new(0));
    let mut ctx = context_with(vec![
        Relay::boxed("A", 800, DeviceState::Off, &switches),
        Relay::boxed("B", 1800, DeviceState::Off, &switches),
    ])
    .await;
    let scheduler = HysteresisScheduler::new(HysteresisSettings::default());

    for cycle in 1..=4u32 {
        let transition = scheduler.schedule(&mut ctx, ExcessPower::Watts(2000)).await;
        assert_eq!(ctx.device("B").unwrap().exceed_counter(), 0);
        if cycle < 4 {
            assert!(transition.is_none());
            assert_eq!(ctx.device("A").unwrap().exceed_counter(), cycle);
        } else {
            let transition = transition.unwrap();
            assert_eq!(transition.device, "A");
            assert_eq!(transition.action, Switch::On);
        }
    }

    assert_eq!(ctx.device("A").unwrap().state(), DeviceState::On);
    assert_eq!(ctx.device("B").unwrap().state(), DeviceState::Off);
    assert!(ctx.devices().iter().all(|d| d.exceed_counter() == 0));
    assert_eq!(switches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sustained_deficit_turns_off_latest_on_device() {
    let switches = Arc::new(AtomicUsize::new(0));
    let mut ctx = context_with(vec![
        Relay::boxed("A", 800, DeviceState::On, &switches),
        Relay::boxed("B", 1800, DeviceState::On, &switches),
    ])
    .await;
    let scheduler = HysteresisScheduler::new(HysteresisSettings::default());

    assert!(scheduler.schedule(&mut ctx, ExcessPower::Watts(-50)).await.is_none());
    let transition = scheduler
        .schedule(&mut ctx, ExcessPower::Watts(-50))
        .await
        .unwrap();

    assert_eq!(transition.device, "B");
    assert_eq!(transition.action, Switch::Off);
    assert_eq!(ctx.device("A").unwrap().state(), DeviceState::On);
    assert_eq!(ctx.device("B").unwrap().state(), DeviceState::Off);
    assert_eq!(ctx.negative_streak(), 0);
}

#[tokio::test]
async fn surplus_skips_devices_already_on() {
    let switches = Arc::new(AtomicUsize::new(0));
    let mut ctx = context_with(vec![
        Relay::boxed("A", 800, DeviceState::On, &switches),
        Relay::boxed("B", 1800, DeviceState::Off, &switches),
    ])
    .await;
    let scheduler = HysteresisScheduler::new(HysteresisSettings::default());

    scheduler.schedule(&mut ctx, ExcessPower::Watts(2000)).await;
    assert_eq!(ctx.device("A").unwrap().exceed_counter(), 0);
    assert_eq!(ctx.device("B").unwrap().exceed_counter(), 1);
}

#[tokio::test]
async fn surplus_interrupts_negative_streak() {
    let switches = Arc::new(AtomicUsize::new(0));
    let mut ctx = context_with(vec![Relay::boxed("A", 800, DeviceState::On, &switches)]).await;
    let scheduler = HysteresisScheduler::new(HysteresisSettings::default());

    for _ in 0..5 {
        scheduler.schedule(&mut ctx, ExcessPower::Watts(-100)).await;
        scheduler.schedule(&mut ctx, ExcessPower::Watts(300)).await;
    }
    assert_eq!(ctx.device("A").unwrap().state(), DeviceState::On);
    assert_eq!(switches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_qualifying_sample_never_toggles() {
    let switches = Arc::new(AtomicUsize::new(0));
    let mut ctx = context_with(vec![Relay::boxed("A", 2000, DeviceState::Off, &switches)]).await;
    let scheduler = HysteresisScheduler::new(HysteresisSettings::default());

    // 150 + 100 does not exceed 2000
    for _ in 0..50 {
        assert!(scheduler.schedule(&mut ctx, ExcessPower::Watts(150)).await.is_none());
    }
    assert_eq!(ctx.device("A").unwrap().exceed_counter(), 0);
    assert_eq!(switches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_sample_changes_nothing() {
    let switches = Arc::new(AtomicUsize::new(0));
    let mut ctx = context_with(vec![
        Relay::boxed("A", 800, DeviceState::Off, &switches),
        Relay::boxed("B", 1800, DeviceState::On, &switches),
    ])
    .await;
    let scheduler = HysteresisScheduler::new(HysteresisSettings::default());

    scheduler.schedule(&mut ctx, ExcessPower::Watts(2000)).await;
    let before = ctx.snapshot();
    for _ in 0..10 {
        assert!(scheduler.schedule(&mut ctx, ExcessPower::Unknown).await.is_none());
    }
    assert_eq!(ctx.snapshot(), before);
}

#[tokio::test]
async fn unreachable_device_is_not_assumed_off() {
    let switches = Arc::new(AtomicUsize::new(0));
    let mut unreachable = Relay::boxed("A", 800, DeviceState::Off, &switches);
    unreachable.reachable = false;
    let mut ctx = context_with(vec![
        unreachable,
        Relay::boxed("B", 1800, DeviceState::Off, &switches),
    ])
    .await;
    let scheduler = HysteresisScheduler::new(HysteresisSettings::default());

    assert_eq!(ctx.device("A").unwrap().state(), DeviceState::Unknown);
    for _ in 0..4 {
        scheduler.schedule(&mut ctx, ExcessPower::Watts(2000)).await;
    }
    // A is neither on nor off, so B is the first device that is off
    assert_eq!(ctx.device("A").unwrap().state(), DeviceState::Unknown);
    assert_eq!(ctx.device("B").unwrap().state(), DeviceState::On);
}
