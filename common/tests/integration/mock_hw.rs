//! Mock fixture for integration tests.
//!
//! Every PWM command and settle delay lands in one shared log so tests can
//! assert on the exact hardware sequence; deferred events are held until the
//! test fires them.

use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use dimmer_common::{
    persistence::{KEY_BRIGHTNESS, KEY_CHANNEL, KEY_FADE_TIME},
    DeferredEvent, DeferredScheduler, Dimmer, DimmerConfig, DimmerError, FadeDriver, Hardware,
    KeyValueStore, Notice, Property, PropertyNotifier, PwmChannel,
};
use embedded_hal::delay::DelayNs;
use serde_json::Value;

// ── Hardware call record ──────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwCall {
    Fade {
        channel: PwmChannel,
        duty: u32,
        duration_ms: u32,
    },
    Delay(u32),
}

pub type HwLog = Arc<Mutex<Vec<HwCall>>>;

pub struct MockDriver {
    log: HwLog,
}

impl FadeDriver for MockDriver {
    fn set_channel_duty(&mut self, channel: PwmChannel, duty: u32, duration_ms: u32) {
        self.log.lock().unwrap().push(HwCall::Fade {
            channel,
            duty,
            duration_ms,
        });
    }
}

pub struct MockDelay {
    log: HwLog,
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.log.lock().unwrap().push(HwCall::Delay(ns / 1_000_000));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.log.lock().unwrap().push(HwCall::Delay(ms));
    }
}

// ── Settings store ────────────────────────────────────────────

#[derive(Default)]
pub struct StoreState {
    pub values: HashMap<String, i32>,
    pub writes: usize,
    pub unavailable: bool,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    pub state: Arc<Mutex<StoreState>>,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn with_settings(channel: i32, brightness: i32, fade_ms: i32) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            state.values.insert(KEY_CHANNEL.into(), channel);
            state.values.insert(KEY_BRIGHTNESS.into(), brightness);
            state.values.insert(KEY_FADE_TIME.into(), fade_ms);
        }
        store
    }

    pub fn get(&self, key: &str) -> Option<i32> {
        self.state.lock().unwrap().values.get(key).copied()
    }

    pub fn put(&self, key: &str, value: i32) {
        self.state.lock().unwrap().values.insert(key.into(), value);
    }

    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }
}

impl KeyValueStore for MemoryStore {
    fn get_i32(&self, key: &str) -> Result<Option<i32>, DimmerError> {
        let state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(DimmerError::StorageUnavailable("nvs_open failed".into()));
        }
        Ok(state.values.get(key).copied())
    }

    fn set_i32(&mut self, key: &str, value: i32) -> Result<(), DimmerError> {
        let mut state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(DimmerError::StorageUnavailable("nvs_open failed".into()));
        }
        state.writes += 1;
        state.values.insert(key.into(), value);
        Ok(())
    }
}

// ── Deferred scheduler ────────────────────────────────────────

#[derive(Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<(Duration, DeferredEvent)>>,
    fail: AtomicBool,
}

#[allow(dead_code)]
impl ManualScheduler {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn pending(&self) -> Vec<(Duration, DeferredEvent)> {
        self.pending.lock().unwrap().clone()
    }

    /// Removes and returns the oldest pending event matching `pick`.
    pub fn take(
        &self,
        pick: impl Fn(&DeferredEvent) -> bool,
    ) -> Option<(Duration, DeferredEvent)> {
        let mut pending = self.pending.lock().unwrap();
        let index = pending.iter().position(|(_, event)| pick(event))?;
        Some(pending.remove(index))
    }
}

impl DeferredScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, event: DeferredEvent) -> Result<(), DimmerError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(DimmerError::SchedulingFailure("timer service full".into()));
        }
        self.pending.lock().unwrap().push((delay, event));
        Ok(())
    }
}

pub fn is_fade_complete(event: &DeferredEvent) -> bool {
    matches!(event, DeferredEvent::FadeComplete { .. })
}

pub fn is_timer_expiry(event: &DeferredEvent) -> bool {
    matches!(event, DeferredEvent::TimerExpired { .. })
}

// ── Notifier ──────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: RefCell<Vec<(Property, Value)>>,
    pub rejecting: RefCell<HashSet<Property>>,
}

#[allow(dead_code)]
impl RecordingNotifier {
    pub fn properties(&self) -> Vec<Property> {
        self.sent.borrow().iter().map(|(property, _)| *property).collect()
    }

    pub fn clear(&self) {
        self.sent.borrow_mut().clear();
    }
}

impl PropertyNotifier for RecordingNotifier {
    fn notify(&self, property: Property, value: Value) -> bool {
        self.sent.borrow_mut().push((property, value));
        !self.rejecting.borrow().contains(&property)
    }
}

// ── Rig ───────────────────────────────────────────────────────

pub struct Rig {
    pub dimmer: Dimmer,
    pub log: HwLog,
    pub store: MemoryStore,
    pub scheduler: Arc<ManualScheduler>,
}

#[allow(dead_code)]
impl Rig {
    pub fn new() -> Self {
        Self::with_store(MemoryStore::default())
    }

    pub fn with_store(store: MemoryStore) -> Self {
        let log: HwLog = Arc::default();
        let scheduler = Arc::new(ManualScheduler::default());
        let hw = Hardware {
            driver: Box::new(MockDriver { log: log.clone() }),
            delay: Box::new(MockDelay { log: log.clone() }),
            store: Box::new(store.clone()),
            scheduler: scheduler.clone(),
        };

        Self {
            dimmer: Dimmer::new(DimmerConfig::default(), hw),
            log,
            store,
            scheduler,
        }
    }

    pub fn calls(&self) -> Vec<HwCall> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Delivers the pending fade completion, if any.
    pub fn finish_fade(&self) -> bool {
        match self.scheduler.take(is_fade_complete) {
            Some((_, event)) => {
                assert!(self.dimmer.handle_deferred(event).is_empty());
                true
            }
            None => false,
        }
    }

    /// Delivers the pending timer expiry and returns what it produced.
    pub fn expire_timer(&self) -> Vec<Notice> {
        let (_, event) = self
            .scheduler
            .take(is_timer_expiry)
            .expect("no timer expiry pending");
        self.dimmer.handle_deferred(event)
    }

    /// Switches on and waits out the fade.
    pub fn turn_on(&self) {
        self.dimmer.set_on("true").unwrap();
        assert!(self.finish_fade());
        self.clear_calls();
    }
}

pub fn fade(channel: PwmChannel, duty: u32, duration_ms: u32) -> HwCall {
    HwCall::Fade {
        channel,
        duty,
        duration_ms,
    }
}
