use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use embedded_hal::delay::DelayNs;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Handle,
    sync::mpsc,
};
use tracing::{info, warn};

use dimmer_common::{
    DeferredEvent, DeferredScheduler, Dimmer, DimmerError, FadeDriver, Hardware, KeyValueStore,
    PeriodicTask, PwmChannel, PwmHardwareConfig, RuntimeConfig,
};

use crate::console::{self, Command, JsonLineSink};

type Sink = Arc<JsonLineSink<std::io::Stdout>>;

struct AppStore {
    runtime_path: PathBuf,
    settings_path: PathBuf,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    let timezone = parse_timezone(&runtime.timezone);
    let (deferred_tx, deferred_rx) = mpsc::unbounded_channel();

    let hw = Hardware {
        driver: Box::new(SimulatedPwm::new(&runtime.pwm)),
        delay: Box::new(StdDelay),
        store: Box::new(FileSettingsStore::new(store.settings_path.clone())),
        scheduler: Arc::new(TokioScheduler {
            handle: Handle::current(),
            events: deferred_tx,
        }),
    };
    let dimmer = Arc::new(Dimmer::new(runtime.dimmer.clone(), hw));
    let sink: Sink = Arc::new(JsonLineSink::new(std::io::stdout()));

    spawn_deferred_loop(dimmer.clone(), sink.clone(), deferred_rx);
    spawn_periodic_loop(
        dimmer.clone(),
        sink.clone(),
        timezone,
        Duration::from_millis(runtime.dimmer.periodic_interval_ms),
    );

    info!(
        "dimmer ready ({}), reading commands from stdin",
        console::HELP
    );

    tokio::select! {
        result = console_loop(dimmer, sink) => result?,
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    Ok(())
}

async fn console_loop(dimmer: Arc<Dimmer>, sink: Sink) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(err) => {
                sink.error(&err);
                continue;
            }
        };

        let dimmer = dimmer.clone();
        let sink = sink.clone();
        tokio::task::spawn_blocking(move || console::execute(&dimmer, command, &sink)).await?;
    }

    info!("stdin closed");
    Ok(())
}

fn spawn_deferred_loop(
    dimmer: Arc<Dimmer>,
    sink: Sink,
    mut events: mpsc::UnboundedReceiver<DeferredEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let dimmer = dimmer.clone();
            let sink = sink.clone();
            let handled = tokio::task::spawn_blocking(move || {
                let notices = dimmer.handle_deferred(event);
                console::forward_notices(&dimmer, &notices, &sink);
            })
            .await;

            if let Err(err) = handled {
                warn!("deferred event {event:?} failed: {err}");
            }
        }
    });
}

fn spawn_periodic_loop(dimmer: Arc<Dimmer>, sink: Sink, timezone: Tz, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        let mut task = PeriodicTask::new();

        loop {
            interval.tick().await;

            let now = Utc::now();
            let today = local_date(timezone, now);
            let dimmer = dimmer.clone();
            let sink = sink.clone();

            task = match tokio::task::spawn_blocking(move || {
                task.tick(&dimmer, now, today, &*sink);
                task
            })
            .await
            {
                Ok(task) => task,
                Err(err) => {
                    warn!("periodic task failed: {err}");
                    PeriodicTask::new()
                }
            };
        }
    });
}

fn parse_timezone(timezone: &str) -> Tz {
    timezone.parse().unwrap_or_else(|_| {
        warn!("unknown timezone `{timezone}`, using UTC");
        Tz::UTC
    })
}

fn local_date(timezone: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&timezone).date_naive()
}

/// Logs duty changes instead of driving a PWM peripheral.
struct SimulatedPwm {
    duties: BTreeMap<&'static str, u32>,
}

impl SimulatedPwm {
    fn new(pwm: &PwmHardwareConfig) -> Self {
        info!(
            "simulated PWM: channel A on GPIO{}, channel B on GPIO{} @ {} Hz",
            pwm.channel_a_gpio, pwm.channel_b_gpio, pwm.frequency_hz
        );
        Self {
            duties: BTreeMap::new(),
        }
    }
}

impl FadeDriver for SimulatedPwm {
    fn set_channel_duty(&mut self, channel: PwmChannel, duty: u32, duration_ms: u32) {
        let previous = self.duties.insert(channel.as_str(), duty).unwrap_or(0);
        info!(
            "PWM {}: duty {previous} -> {duty} over {duration_ms} ms",
            channel.as_str()
        );
    }
}

struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

struct TokioScheduler {
    handle: Handle,
    events: mpsc::UnboundedSender<DeferredEvent>,
}

impl DeferredScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, event: DeferredEvent) -> Result<(), DimmerError> {
        if self.events.is_closed() {
            return Err(DimmerError::SchedulingFailure(
                "deferred event loop stopped".into(),
            ));
        }

        let events = self.events.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if events.send(event).is_err() {
                warn!("dropping {event:?}: deferred event loop stopped");
            }
        });
        Ok(())
    }
}

/// Integer settings kept as a flat JSON object in `settings.json`.
struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn unavailable(&self, err: impl std::fmt::Display) -> DimmerError {
        DimmerError::StorageUnavailable(format!("{}: {err}", self.path.display()))
    }

    fn read(&self) -> Result<BTreeMap<String, i32>, DimmerError> {
        match std::fs::read(&self.path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|err| self.unavailable(err)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(self.unavailable(err)),
        }
    }
}

impl KeyValueStore for FileSettingsStore {
    fn get_i32(&self, key: &str) -> Result<Option<i32>, DimmerError> {
        Ok(self.read()?.get(key).copied())
    }

    fn set_i32(&mut self, key: &str, value: i32) -> Result<(), DimmerError> {
        let mut values = self.read()?;
        values.insert(key.to_string(), value);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|err| self.unavailable(err))?;
        }
        let payload = serde_json::to_vec_pretty(&values).map_err(|err| self.unavailable(err))?;
        std::fs::write(&self.path, payload).map_err(|err| self.unavailable(err))
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("DIMMER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.dimmer"));
        Self::in_dir(&data_dir)
    }

    fn in_dir(data_dir: &Path) -> Self {
        Self {
            runtime_path: data_dir.join("runtime.json"),
            settings_path: data_dir.join("settings.json"),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(&self.runtime_path).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}
