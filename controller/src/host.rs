use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use towelrack_common::{
    ports::{Display, Heater, SettingsStore, TemperatureSensor},
    BoundaryPolicy, ControllerConfig, DisplayContent, DisplayFrame, HardwareConfig, InputEvent,
    PersistedSettings, Rgb, SensorError, SettingsError,
};

use crate::{
    indicator::{PatternIndicator, PixelStrip},
    runtime::{load_settings, Runtime},
};

const PHYSICS_STEP_MS: u64 = 1_000;
const HEATER_GAIN_C_PER_S: f64 = 0.6;
const LOSS_PER_S: f64 = 0.01;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut store = FileSettingsStore::new();
    let mut settings = load_settings(&mut store);

    let config = config_from_env();
    let mut hardware = HardwareConfig::default();
    hardware.sanitize();

    let ambient_c = std::env::var("TOWELRACK_AMBIENT_C")
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(20.0);
    let rack = SimRack::new(ambient_c);

    info!(
        "host simulator: boundary={}, timer_entry_while_off={}, ambient={ambient_c}C, adopted={}",
        config.boundary.as_str(),
        config.timer_entry_while_off,
        settings.adopted,
    );

    let indicator = PatternIndicator::spawn(LogStrip {
        brightness_pct: hardware.strip_brightness_pct,
        leds: hardware.strip_len,
    })?;
    let diagnostics = format!(
        "firmware {} ({} build, host simulator), adopted={}",
        env!("CARGO_PKG_VERSION"),
        if cfg!(debug_assertions) { "debug" } else { "release" },
        settings.adopted,
    );
    let (runtime, parts) = Runtime::new(
        config,
        Box::new(ConsoleDisplay::default()),
        Box::new(indicator),
        diagnostics,
    );

    spawn_physics_loop(rack.clone());

    let boot_runtime = runtime.clone();
    let boot_rack = rack.clone();
    let adopted = settings.adopted;
    tokio::task::spawn_blocking(move || {
        let mut sensor = SimSensor(boot_rack.clone());
        boot_runtime.self_test(&mut sensor, adopted);
        boot_runtime.spawn_tasks(
            parts,
            Box::new(SimSensor(boot_rack.clone())),
            Box::new(SimHeater(boot_rack)),
        )
    })
    .await??;

    info!("commands: l r long click [n] tl tr | fault status adopt quit");

    let input = runtime.input();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "" => {}
            "quit" | "exit" => break,
            "fault" => {
                let faulted = rack.toggle_fault();
                warn!("simulated sensor fault {}", if faulted { "on" } else { "off" });
            }
            "status" => {
                let snapshot = runtime.lock().engine.snapshot();
                info!(
                    "status: {} rack={:.1}C heater={}",
                    serde_json::to_string(&snapshot)?,
                    rack.temperature(),
                    rack.heater_on()
                );
            }
            "adopt" => {
                settings.adopted = true;
                match store.save(&settings) {
                    Ok(()) => info!("device marked as adopted"),
                    Err(err) => warn!("failed to persist adopted flag: {err}"),
                }
            }
            command => match command.parse::<InputEvent>() {
                Ok(event) => {
                    if let Err(err) = input.send(event) {
                        warn!("{err}");
                    }
                }
                Err(err) => warn!("dropping input: {err}"),
            },
        }
    }

    info!("shutting down");
    Ok(())
}

fn config_from_env() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    if let Ok(value) = std::env::var("TOWELRACK_BOUNDARY") {
        match BoundaryPolicy::parse(&value) {
            Some(boundary) => config.boundary = boundary,
            None => warn!("ignoring TOWELRACK_BOUNDARY=`{value}`"),
        }
    }
    config.timer_entry_while_off = std::env::var("TOWELRACK_TIMER_WHILE_OFF")
        .ok()
        .and_then(|value| value.parse::<bool>().ok())
        .unwrap_or(config.timer_entry_while_off);
    config.sanitize();
    config
}

fn spawn_physics_loop(rack: SimRack) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(PHYSICS_STEP_MS));
        loop {
            interval.tick().await;
            rack.step(PHYSICS_STEP_MS as f64 / 1_000.0);
        }
    });
}

#[derive(Debug)]
struct RackModel {
    temp_c: f64,
    ambient_c: f64,
    heater_on: bool,
    sensor_fault: bool,
}

/// First-order thermal model of the rack shared by the simulated sensor and heater.
#[derive(Debug, Clone)]
struct SimRack(Arc<Mutex<RackModel>>);

impl SimRack {
    fn new(ambient_c: f64) -> Self {
        Self(Arc::new(Mutex::new(RackModel {
            temp_c: ambient_c,
            ambient_c,
            heater_on: false,
            sensor_fault: false,
        })))
    }

    fn model(&self) -> std::sync::MutexGuard<'_, RackModel> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn step(&self, dt_s: f64) {
        let mut model = self.model();
        let gain = if model.heater_on {
            HEATER_GAIN_C_PER_S
        } else {
            0.0
        };
        let loss = (model.temp_c - model.ambient_c) * LOSS_PER_S;
        model.temp_c += (gain - loss) * dt_s;
    }

    fn temperature(&self) -> f64 {
        self.model().temp_c
    }

    fn heater_on(&self) -> bool {
        self.model().heater_on
    }

    fn toggle_fault(&self) -> bool {
        let mut model = self.model();
        model.sensor_fault = !model.sensor_fault;
        model.sensor_fault
    }
}

struct SimSensor(SimRack);

impl TemperatureSensor for SimSensor {
    fn read(&mut self) -> Result<i32, SensorError> {
        let model = self.0.model();
        if model.sensor_fault {
            return Err(SensorError::Read("simulated open circuit".to_string()));
        }
        Ok(model.temp_c.round() as i32)
    }
}

struct SimHeater(SimRack);

impl SimHeater {
    fn switch(&mut self, on: bool) {
        let mut model = self.0.model();
        if model.heater_on != on {
            debug!("heater {}", if on { "enabled" } else { "disabled" });
        }
        model.heater_on = on;
    }
}

impl Heater for SimHeater {
    fn enable(&mut self) {
        self.switch(true);
    }

    fn disable(&mut self) {
        self.switch(false);
    }
}

#[derive(Default)]
struct ConsoleDisplay {
    flag_c: bool,
    flag_h: bool,
}

impl ConsoleDisplay {
    fn print(&self, content: DisplayContent) {
        let frame = DisplayFrame {
            content,
            flag_c: self.flag_c,
            flag_h: self.flag_h,
        };
        info!(
            target: "display",
            "[{:>2}] {}{} segments={:02x?}",
            frame.text(),
            if frame.flag_c && !frame.is_blank() { "C" } else { "-" },
            if frame.flag_h && !frame.is_blank() { "H" } else { "-" },
            frame.encode()
        );
    }
}

impl Display for ConsoleDisplay {
    fn write_digits(&mut self, value: i32) {
        self.print(DisplayContent::Number(value));
    }

    fn write_blank(&mut self) {
        self.print(DisplayContent::Blank);
    }

    fn write_error(&mut self) {
        self.print(DisplayContent::Error);
    }

    fn set_flag_c(&mut self, lit: bool) {
        self.flag_c = lit;
    }

    fn set_flag_h(&mut self, lit: bool) {
        self.flag_h = lit;
    }
}

struct LogStrip {
    brightness_pct: u8,
    leds: usize,
}

impl PixelStrip for LogStrip {
    fn fill(&mut self, color: Rgb) -> anyhow::Result<()> {
        let scaled = color.scaled(self.brightness_pct);
        debug!(
            target: "strip",
            "{}x #{:02x}{:02x}{:02x}",
            self.leds,
            scaled.r,
            scaled.g,
            scaled.b
        );
        Ok(())
    }
}

struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    fn new() -> Self {
        let data_dir = std::env::var("TOWELRACK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.towelrack"));

        Self {
            path: data_dir.join("settings.json"),
        }
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&mut self) -> Result<Option<PersistedSettings>, SettingsError> {
        match std::fs::read(&self.path) {
            Ok(raw) => PersistedSettings::from_json(&raw).map(Some),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SettingsError::Unavailable(err.to_string())),
        }
    }

    fn save(&mut self, settings: &PersistedSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| SettingsError::Unavailable(err.to_string()))?;
        }
        let payload = serde_json::to_vec_pretty(settings)
            .map_err(|err| SettingsError::Corrupt(err.to_string()))?;
        std::fs::write(&self.path, payload)
            .map_err(|err| SettingsError::Unavailable(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> FileSettingsStore {
        let dir = std::env::temp_dir().join(format!("towelrack-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        FileSettingsStore {
            path: dir.join("settings.json"),
        }
    }

    #[test]
    fn file_store_round_trips_the_adopted_flag() {
        let mut store = temp_store("roundtrip");
        assert_eq!(store.load(), Ok(None));

        let settings = PersistedSettings {
            adopted: true,
            ..PersistedSettings::default()
        };
        store.save(&settings).unwrap();
        assert_eq!(store.load(), Ok(Some(settings)));
    }

    #[test]
    fn foreign_file_is_rejected() {
        let store = temp_store("foreign");
        std::fs::create_dir_all(store.path.parent().unwrap()).unwrap();
        std::fs::write(&store.path, br#"{"magic":1,"adopted":true}"#).unwrap();

        let mut store = store;
        assert_eq!(store.load(), Err(SettingsError::BadMagic(1)));
    }

    #[test]
    fn heater_warms_the_rack_and_it_cools_back() {
        let rack = SimRack::new(20.0);
        let mut heater = SimHeater(rack.clone());
        let mut sensor = SimSensor(rack.clone());

        heater.enable();
        for _ in 0..60 {
            rack.step(1.0);
        }
        let warm = sensor.read().unwrap();
        assert!(warm > 40, "rack only reached {warm}");

        heater.disable();
        for _ in 0..60 {
            rack.step(1.0);
        }
        assert!(sensor.read().unwrap() < warm);
    }

    #[test]
    fn injected_fault_surfaces_as_read_error() {
        let rack = SimRack::new(20.0);
        let mut sensor = SimSensor(rack.clone());
        assert!(rack.toggle_fault());
        assert!(matches!(sensor.read(), Err(SensorError::Read(_))));
    }
}
