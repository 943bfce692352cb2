use std::{
    io::BufRead,
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use chrono::Utc;
use chrono_tz::Tz;
use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::{
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    sys::{self, esp_err_t},
};
use log::{info, warn};

use dimmer_common::{
    persistence::KEY_CHANNEL, DeferredEvent, DeferredScheduler, Dimmer, DimmerError, FadeDriver,
    Hardware, KeyValueStore, PeriodicTask, PwmChannel, PwmHardwareConfig, RuntimeConfig,
};

use crate::console::{self, Command, JsonLineSink};

const NVS_SETTINGS_NAMESPACE: &str = "storage";
const NVS_RUNTIME_NAMESPACE: &str = "dimmer";
const NVS_RUNTIME_KEY: &str = "runtime_json";

#[cfg(esp32)]
const SPEED_MODE: sys::ledc_mode_t = sys::ledc_mode_t_LEDC_HIGH_SPEED_MODE;
#[cfg(not(esp32))]
const SPEED_MODE: sys::ledc_mode_t = sys::ledc_mode_t_LEDC_LOW_SPEED_MODE;

type Sink = Arc<JsonLineSink<std::io::Stdout>>;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let nvs_partition = EspDefaultNvsPartition::take()?;
    let mut runtime = load_runtime_config(&nvs_partition).unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let driver = LedcFadeDriver::new(&runtime.pwm, runtime.dimmer.duty_resolution_bits)
        .context("LEDC setup failed")?;
    info!(
        "LEDC ready: channel A on GPIO{}, channel B on GPIO{} @ {} Hz",
        runtime.pwm.channel_a_gpio, runtime.pwm.channel_b_gpio, runtime.pwm.frequency_hz
    );

    let timezone: Tz = runtime.timezone.parse().unwrap_or_else(|_| {
        warn!("unknown timezone `{}`, using UTC", runtime.timezone);
        Tz::UTC
    });

    let (deferred_tx, deferred_rx) = mpsc::channel();
    let hw = Hardware {
        driver: Box::new(driver),
        delay: Box::new(FreeRtos),
        store: Box::new(NvsSettingsStore {
            partition: nvs_partition,
        }),
        scheduler: Arc::new(ThreadScheduler {
            events: deferred_tx,
        }),
    };
    let dimmer = Arc::new(Dimmer::new(runtime.dimmer.clone(), hw));
    let sink: Sink = Arc::new(JsonLineSink::new(std::io::stdout()));

    spawn_deferred_loop(dimmer.clone(), sink.clone(), deferred_rx)?;
    spawn_periodic_loop(
        dimmer.clone(),
        sink.clone(),
        timezone,
        Duration::from_millis(runtime.dimmer.periodic_interval_ms),
    )?;

    console_loop(&dimmer, &sink)
}

fn console_loop(dimmer: &Dimmer, sink: &Sink) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let mut line = String::new();

    loop {
        line.clear();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => thread::sleep(Duration::from_millis(100)),
            Ok(_) => match Command::parse(&line) {
                Ok(Some(command)) => console::execute(dimmer, command, sink),
                Ok(None) => {}
                Err(err) => {
                    sink.error(&err);
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(100));
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn spawn_deferred_loop(
    dimmer: Arc<Dimmer>,
    sink: Sink,
    events: mpsc::Receiver<DeferredEvent>,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("deferred".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            for event in events {
                let notices = dimmer.handle_deferred(event);
                console::forward_notices(&dimmer, &notices, &sink);
            }
            warn!("deferred event channel closed");
        })
        .context("failed to spawn deferred event thread")?;
    Ok(())
}

fn spawn_periodic_loop(
    dimmer: Arc<Dimmer>,
    sink: Sink,
    timezone: Tz,
    period: Duration,
) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("periodic".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            let mut task = PeriodicTask::new();
            loop {
                let now = Utc::now();
                let today = now.with_timezone(&timezone).date_naive();
                task.tick(&dimmer, now, today, &*sink);
                thread::sleep(period);
            }
        })
        .context("failed to spawn periodic thread")?;
    Ok(())
}

/// One sleeping thread per pending event; at most a fade completion and a
/// timer expiry are outstanding at once.
struct ThreadScheduler {
    events: mpsc::Sender<DeferredEvent>,
}

impl DeferredScheduler for ThreadScheduler {
    fn schedule(&self, delay: Duration, event: DeferredEvent) -> Result<(), DimmerError> {
        let events = self.events.clone();
        thread::Builder::new()
            .name("deferred-timer".into())
            .stack_size(8 * 1024)
            .spawn(move || {
                thread::sleep(delay);
                if events.send(event).is_err() {
                    warn!("dropping {event:?}: deferred event thread stopped");
                }
            })
            .map(|_| ())
            .map_err(|err| DimmerError::SchedulingFailure(err.to_string()))
    }
}

/// LEDC peripheral with the hardware fade service installed.
struct LedcFadeDriver;

impl LedcFadeDriver {
    fn new(pwm: &PwmHardwareConfig, resolution_bits: u8) -> anyhow::Result<Self> {
        let timer = sys::ledc_timer_config_t {
            speed_mode: SPEED_MODE,
            duty_resolution: sys::ledc_timer_bit_t::from(resolution_bits),
            timer_num: sys::ledc_timer_t_LEDC_TIMER_0,
            freq_hz: pwm.frequency_hz,
            clk_cfg: sys::soc_periph_ledc_clk_src_legacy_t_LEDC_AUTO_CLK,
            ..Default::default()
        };
        check(unsafe { sys::ledc_timer_config(&timer) }, "ledc_timer_config")?;

        for (channel, gpio) in [
            (PwmChannel::A, pwm.channel_a_gpio),
            (PwmChannel::B, pwm.channel_b_gpio),
        ] {
            let config = sys::ledc_channel_config_t {
                gpio_num: gpio,
                speed_mode: SPEED_MODE,
                channel: ledc_channel(channel),
                intr_type: sys::ledc_intr_type_t_LEDC_INTR_DISABLE,
                timer_sel: sys::ledc_timer_t_LEDC_TIMER_0,
                duty: 0,
                hpoint: 0,
                ..Default::default()
            };
            check(
                unsafe { sys::ledc_channel_config(&config) },
                "ledc_channel_config",
            )?;
        }

        check(unsafe { sys::ledc_fade_func_install(0) }, "ledc_fade_func_install")?;
        Ok(Self)
    }
}

impl FadeDriver for LedcFadeDriver {
    fn set_channel_duty(&mut self, channel: PwmChannel, duty: u32, duration_ms: u32) {
        let ledc = ledc_channel(channel);
        let duration = i32::try_from(duration_ms).unwrap_or(i32::MAX);

        let result = check(
            unsafe { sys::ledc_set_fade_with_time(SPEED_MODE, ledc, duty, duration) },
            "ledc_set_fade_with_time",
        )
        .and_then(|()| {
            check(
                unsafe {
                    sys::ledc_fade_start(SPEED_MODE, ledc, sys::ledc_fade_mode_t_LEDC_FADE_NO_WAIT)
                },
                "ledc_fade_start",
            )
        });

        if let Err(err) = result {
            warn!("fade on channel {} not started: {err:#}", channel.as_str());
        }
    }
}

fn ledc_channel(channel: PwmChannel) -> sys::ledc_channel_t {
    match channel {
        PwmChannel::A => sys::ledc_channel_t_LEDC_CHANNEL_0,
        PwmChannel::B => sys::ledc_channel_t_LEDC_CHANNEL_1,
    }
}

fn check(rc: esp_err_t, what: &str) -> anyhow::Result<()> {
    if rc == sys::ESP_OK {
        return Ok(());
    }
    Err(anyhow!("{what} failed with code {rc}"))
}

/// The three durable settings in NVS namespace `storage`. The channel index
/// is kept as an i8 entry.
struct NvsSettingsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsSettingsStore {
    fn open(&self, read_write: bool) -> Result<EspNvs<NvsDefault>, DimmerError> {
        EspNvs::new(self.partition.clone(), NVS_SETTINGS_NAMESPACE, read_write)
            .map_err(|err| DimmerError::StorageUnavailable(err.to_string()))
    }
}

impl KeyValueStore for NvsSettingsStore {
    fn get_i32(&self, key: &str) -> Result<Option<i32>, DimmerError> {
        let nvs = self.open(true)?;
        let value = if key == KEY_CHANNEL {
            nvs.get_i8(key).map(|value| value.map(i32::from))
        } else {
            nvs.get_i32(key)
        };
        value.map_err(|err| DimmerError::StorageUnavailable(format!("{key}: {err}")))
    }

    fn set_i32(&mut self, key: &str, value: i32) -> Result<(), DimmerError> {
        let nvs = self.open(true)?;
        let result = if key == KEY_CHANNEL {
            let value = i8::try_from(value)
                .map_err(|_| DimmerError::InvalidInput(format!("{key} out of range: {value}")))?;
            nvs.set_i8(key, value)
        } else {
            nvs.set_i32(key, value)
        };
        result.map_err(|err| DimmerError::StorageUnavailable(format!("{key}: {err}")))
    }
}

fn load_runtime_config(partition: &EspDefaultNvsPartition) -> anyhow::Result<RuntimeConfig> {
    let nvs = EspNvs::new(partition.clone(), NVS_RUNTIME_NAMESPACE, true)?;
    let mut buffer = vec![0_u8; 1024];

    match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
        Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
        None => Ok(RuntimeConfig::default()),
    }
}
