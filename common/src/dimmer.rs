use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use embedded_hal::delay::DelayNs;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::{
    channel::{level_plan, reselection_plan, ChannelState},
    config::{
        DimmerConfig, PersistedSettings, BRIGHTNESS_MAX, BRIGHTNESS_MIN, FADE_TIME_MAX_MS,
        FADE_TIME_MIN_MS,
    },
    error::DimmerError,
    fade::{FadeCommand, FadeContext, FadeCoordinator},
    on_time::OnTimeCounter,
    persistence,
    ports::{DeferredEvent, DeferredScheduler, FadeDriver, KeyValueStore},
    timer::{self, PendingTimer},
    types::{Channel, DimmerStatus, Notice, Property, SetOutcome},
};

/// Collaborators the dimmer drives. All of them are only touched while the
/// dimmer lock is held.
pub struct Hardware {
    pub driver: Box<dyn FadeDriver>,
    pub delay: Box<dyn DelayNs + Send>,
    pub store: Box<dyn KeyValueStore>,
    pub scheduler: Arc<dyn DeferredScheduler>,
}

#[derive(Debug, Clone, Copy)]
struct DeviceState {
    is_on: bool,
    channels: ChannelState,
    brightness: u8,
    fade_duration_ms: u32,
}

impl DeviceState {
    fn settings(&self) -> PersistedSettings {
        PersistedSettings {
            channel: self.channels.current(),
            brightness: self.brightness,
            fade_duration_ms: self.fade_duration_ms,
        }
    }
}

struct Core {
    config: DimmerConfig,
    state: DeviceState,
    fade: FadeCoordinator,
    on_time: OnTimeCounter,
    timer: PendingTimer,
    hw: Hardware,
}

impl Core {
    fn run_plan(&mut self, plan: &[FadeCommand]) -> Result<(), DimmerError> {
        let Hardware {
            driver,
            delay,
            scheduler,
            ..
        } = &mut self.hw;
        let mut ctx = FadeContext {
            driver: &mut **driver,
            delay: &mut **delay,
            scheduler: &**scheduler,
        };
        self.fade.start_fade(&mut ctx, plan)
    }

    /// Fades the active outputs to `percent` using the current fade time.
    fn fade_active(&mut self, percent: u8) -> Result<(), DimmerError> {
        let plan = level_plan(
            self.state.channels.current(),
            percent,
            self.state.fade_duration_ms,
            self.config.settle_delay_ms,
        );
        self.run_plan(&plan)
    }

    fn power(&mut self, on: bool) -> Result<(), DimmerError> {
        let percent = if on { self.state.brightness } else { 0 };
        self.fade_active(percent)?;
        self.state.is_on = on;
        Ok(())
    }

    fn persist(&mut self) {
        let settings = self.state.settings();
        if let Err(err) = persistence::save(self.hw.store.as_mut(), &settings) {
            warn!("settings kept in memory only: {err}");
        }
    }

    /// Replaces the durable settings in the live state with what storage holds.
    fn reconcile(&mut self) {
        let stored = persistence::load_or(self.hw.store.as_ref(), self.state.settings());
        self.state.channels.select(stored.channel);
        self.state.brightness = stored.brightness;
        self.state.fade_duration_ms = stored.fade_duration_ms;
    }

    fn schedule(&self, delay: Duration, event: DeferredEvent) -> Result<(), DimmerError> {
        self.hw.scheduler.schedule(delay, event)
    }

    fn expire_timer(&mut self, generation: u64) -> Vec<Notice> {
        if !self.timer.is_current(generation) {
            debug!("ignoring stale timer expiry {generation}");
            return Vec::new();
        }

        if self.fade.is_in_flight() {
            let retry_ms = self.fade.settle_window_ms(self.state.fade_duration_ms);
            match self.schedule(
                Duration::from_millis(retry_ms),
                DeferredEvent::TimerExpired { generation },
            ) {
                Ok(()) => {
                    debug!("timer expired during a fade, retrying in {retry_ms} ms");
                    return Vec::new();
                }
                Err(err) => {
                    warn!("timer retry could not be scheduled, forcing off: {err}");
                    self.fade.abandon();
                }
            }
        }

        self.timer.complete(generation);
        info!("timer expired, switching off");

        let before = self.state;
        if self.state.is_on {
            if let Err(err) = self.power(false) {
                warn!("switch off after timer failed: {err}");
            }
        }
        self.reconcile();

        let mut notices = vec![Notice::PropertyChanged(Property::On)];
        if before.channels.current() != self.state.channels.current() {
            notices.push(Notice::PropertyChanged(Property::Channel));
        }
        if before.fade_duration_ms != self.state.fade_duration_ms {
            notices.push(Notice::PropertyChanged(Property::FadeTime));
        }
        if before.brightness != self.state.brightness {
            notices.push(Notice::PropertyChanged(Property::Brightness));
        }
        notices.push(Notice::TimerCompleted);
        notices
    }
}

/// The dimmer core. Every operation takes the single state lock for its whole
/// read/mutate section, including hardware commands and the settle delay
/// between paired channel commands.
pub struct Dimmer {
    core: Mutex<Core>,
}

impl Dimmer {
    /// Builds the core from persisted settings. The fixture starts switched
    /// off; no hardware command is issued.
    pub fn new(mut config: DimmerConfig, hw: Hardware) -> Self {
        config.sanitize();
        let settings = persistence::load_or(hw.store.as_ref(), PersistedSettings::default());
        info!(
            "dimmer settings: channel {}, brightness {}%, fade {} ms",
            settings.channel.label(),
            settings.brightness,
            settings.fade_duration_ms
        );

        let core = Core {
            fade: FadeCoordinator::new(config.max_duty(), config.fade_completion_margin_ms),
            on_time: OnTimeCounter::new(config.min_plausible_year),
            timer: PendingTimer::default(),
            state: DeviceState {
                is_on: false,
                channels: ChannelState::new(settings.channel),
                brightness: settings.brightness,
                fade_duration_ms: settings.fade_duration_ms,
            },
            config,
            hw,
        };

        Self {
            core: Mutex::new(core),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `on` property: accepts `true` or `false`.
    pub fn set_on(&self, raw: &str) -> Result<SetOutcome, DimmerError> {
        let mut core = self.lock();
        core.fade.ensure_idle()?;

        let on = match raw.trim() {
            "true" => true,
            "false" => false,
            other => {
                return Err(DimmerError::InvalidInput(format!(
                    "on/off value `{other}`"
                )))
            }
        };

        if on == core.state.is_on {
            return Ok(SetOutcome::Unchanged);
        }

        core.power(on)?;
        if !on {
            core.persist();
        }
        Ok(SetOutcome::Changed)
    }

    /// `channel` property. While a fade is in flight the new selection is
    /// committed but the outputs are left as they are until the next power or
    /// brightness change.
    pub fn set_channel(&self, raw: &str) -> Result<SetOutcome, DimmerError> {
        let next = Channel::parse_label(raw)?;
        let mut core = self.lock();

        let from = core.state.channels.current();
        if !core.state.channels.select(next) {
            return Ok(SetOutcome::Unchanged);
        }

        if core.state.is_on {
            if core.fade.is_in_flight() {
                info!(
                    "channel {} selected during a fade, outputs not updated",
                    next.label()
                );
            } else {
                let plan = reselection_plan(
                    from,
                    next,
                    core.state.brightness,
                    core.state.fade_duration_ms,
                    core.config.settle_delay_ms,
                );
                core.run_plan(&plan)?;
            }
        }

        Ok(SetOutcome::Changed)
    }

    /// `brightness` property, clamped to 0..=100. While on, the active
    /// outputs are faded to the value even when it did not change.
    pub fn set_brightness(&self, raw: &str) -> Result<SetOutcome, DimmerError> {
        let mut core = self.lock();
        core.fade.ensure_idle()?;

        let requested = parse_integer(raw)?;
        let brightness =
            requested.clamp(i64::from(BRIGHTNESS_MIN), i64::from(BRIGHTNESS_MAX)) as u8;

        let changed = brightness != core.state.brightness;
        core.state.brightness = brightness;

        if core.state.is_on {
            core.fade_active(brightness)?;
        }
        Ok(SetOutcome::from_changed(changed))
    }

    /// `fade-time` property in milliseconds, clamped to 100..=10000.
    pub fn set_fade_time(&self, raw: &str) -> Result<SetOutcome, DimmerError> {
        let mut core = self.lock();
        core.fade.ensure_idle()?;

        let requested = parse_integer(raw)?;
        let fade_ms =
            requested.clamp(i64::from(FADE_TIME_MIN_MS), i64::from(FADE_TIME_MAX_MS)) as u32;

        let changed = fade_ms != core.state.fade_duration_ms;
        core.state.fade_duration_ms = fade_ms;
        Ok(SetOutcome::from_changed(changed))
    }

    /// `timer` action. `Changed` means the fixture was switched on and the
    /// `on` property must be announced.
    pub fn start_timer(&self, raw: &str) -> Result<SetOutcome, DimmerError> {
        let mut core = self.lock();
        if core.timer.is_running() {
            return Err(DimmerError::AlreadyRunning);
        }
        let minutes = timer::parse_duration_minutes(raw)?;

        let switch_on = !core.state.is_on;
        if switch_on {
            core.fade.ensure_idle()?;
        }

        let generation = core.timer.arm(minutes, Instant::now())?;
        let event = DeferredEvent::TimerExpired { generation };
        if let Err(err) = core.schedule(timer::minutes_to_duration(minutes), event) {
            warn!("timer not started: {err}");
            core.timer.disarm();
            return Err(err);
        }
        info!("timer started for {minutes} min");

        if switch_on {
            core.power(true)?;
        }
        Ok(SetOutcome::from_changed(switch_on))
    }

    /// Processes a deferred event delivered by the scheduler.
    pub fn handle_deferred(&self, event: DeferredEvent) -> Vec<Notice> {
        let mut core = self.lock();
        match event {
            DeferredEvent::FadeComplete { generation } => {
                if !core.fade.complete(generation) {
                    debug!("ignoring stale fade completion {generation}");
                }
                Vec::new()
            }
            DeferredEvent::TimerExpired { generation } => core.expire_timer(generation),
        }
    }

    /// Advances the daily on-time counter. Returns `true` when the minute
    /// value changed.
    pub fn sample_on_time(&self, now: DateTime<Utc>) -> bool {
        let mut core = self.lock();
        let is_on = core.state.is_on;
        core.on_time.sample(now, is_on)
    }

    /// Starts a new day of on-time accounting. Time up to `now` is still
    /// credited to the previous sample window before the counters are zeroed.
    pub fn reset_daily_on_time(&self, now: DateTime<Utc>) -> bool {
        let mut core = self.lock();
        let is_on = core.state.is_on;
        core.on_time.sample(now, is_on);
        info!("daily on-time reset at {} min", core.on_time.minutes());
        core.on_time.reset()
    }

    /// Whether the wall clock has been set (SNTP or RTC) and can be trusted
    /// for on-time accounting.
    pub fn is_clock_plausible(&self, now: DateTime<Utc>) -> bool {
        self.lock().on_time.is_plausible(now)
    }

    pub fn is_on(&self) -> bool {
        self.lock().state.is_on
    }

    pub fn is_fade_in_flight(&self) -> bool {
        self.lock().fade.is_in_flight()
    }

    pub fn is_timer_running(&self) -> bool {
        self.lock().timer.is_running()
    }

    pub fn settings(&self) -> PersistedSettings {
        self.lock().state.settings()
    }

    pub fn previous_channel(&self) -> Channel {
        self.lock().state.channels.previous()
    }

    pub fn daily_on_seconds(&self) -> u32 {
        self.lock().on_time.seconds()
    }

    pub fn status(&self) -> DimmerStatus {
        let core = self.lock();
        DimmerStatus {
            on: core.state.is_on,
            channel: core.state.channels.current().label(),
            brightness: core.state.brightness,
            fade_time_ms: core.state.fade_duration_ms,
            daily_on_minutes: core.on_time.minutes(),
            fade_in_flight: core.fade.is_in_flight(),
            timer_running: core.timer.is_running(),
            timer_remaining_s: core
                .timer
                .remaining(Instant::now())
                .map(|left| left.as_secs()),
        }
    }

    /// Current value of `property` as sent to subscribers.
    pub fn property_value(&self, property: Property) -> Value {
        let core = self.lock();
        match property {
            Property::On => json!(core.state.is_on),
            Property::Channel => json!(core.state.channels.current().label()),
            Property::Brightness => json!(core.state.brightness),
            Property::FadeTime => json!(core.state.fade_duration_ms),
            Property::DailyOnMinutes => json!(core.on_time.minutes()),
        }
    }
}

/// Integer property values arrive as text; a JSON number with a fraction is
/// truncated.
fn parse_integer(raw: &str) -> Result<i64, DimmerError> {
    let trimmed = raw.trim();
    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(value);
    }
    match trimmed.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value.trunc() as i64),
        _ => Err(DimmerError::InvalidInput(format!("not a number: `{trimmed}`"))),
    }
}
