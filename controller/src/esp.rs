use core::convert::TryInto;
use std::{
    ffi::CStr,
    sync::OnceLock,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};
use esp_idf_svc::{
    hal::prelude::Peripherals,
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    sys::{self, EspError},
    timer::EspTimer,
};
use log::{error, info, warn};

use towelrack_common::{
    ports::{Heater, SettingsStore, TemperatureSensor},
    ControllerConfig, HardwareConfig, NtcParams, PersistedSettings, SensorError, SettingsError,
};

use crate::{
    indicator::PatternIndicator,
    inputs::InputPoller,
    led_strip::LedStrip,
    runtime::{load_settings, Runtime},
    segment_display::SegmentDisplay,
};

const NVS_NAMESPACE: &str = "sys_param";
const NVS_SETTINGS_KEY: &str = "param";
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const SUPERVISOR_PERIOD_MS: u64 = 1_000;
const RESTART_DELAY_MS: u64 = 500;
const ADC_WIDTH_BIT_12: u32 = 3;
const ADC_ATTEN_DB_11: u32 = 3;
const ADC_FULL_SCALE: i32 = 4095;
const ADC_SAMPLES: i32 = 8;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let services = match start() {
        Ok(services) => services,
        Err(err) => {
            error!("startup failed: {err:#}");
            restart();
        }
    };

    if let Err(err) =
        init_watchdog(WATCHDOG_TIMEOUT_SEC).and_then(|()| add_current_task_to_watchdog())
    {
        error!("watchdog setup failed: {err:#}");
        restart();
    }

    loop {
        feed_watchdog();
        if let Some(task) = services.tasks.iter().find(|task| task.is_finished()) {
            error!(
                "task `{}` exited, restarting",
                task.thread().name().unwrap_or("unnamed")
            );
            restart();
        }
        thread::sleep(Duration::from_millis(SUPERVISOR_PERIOD_MS));
    }
}

/// Everything that must stay alive for the program lifetime.
struct Services {
    tasks: Vec<JoinHandle<()>>,
    _input_timer: EspTimer<'static>,
}

fn start() -> anyhow::Result<Services> {
    let mut store = NvsStore {
        partition: EspDefaultNvsPartition::take()?,
    };
    let settings = load_settings(&mut store);

    let mut config = ControllerConfig::default();
    config.sanitize();
    let mut hardware = HardwareConfig::default();
    hardware.sanitize();

    let Peripherals { rmt, .. } = Peripherals::take()?;

    let strip = LedStrip::new(
        rmt.channel0,
        unsafe { AnyOutputPin::new(hardware.strip_pin) },
        hardware.strip_len,
        hardware.strip_brightness_pct,
    )?;
    let indicator = PatternIndicator::spawn(strip)?;
    let display = SegmentDisplay::new(&hardware)?;
    let mut sensor = NtcSensor::new(hardware.ntc_adc_channel, NtcParams::default())?;
    let heater = HeaterOutput::new(hardware.heater_pin)?;
    let poller = InputPoller::new(&hardware)?;

    let diagnostics = format!(
        "firmware {} on ESP-IDF {}, adopted={}",
        env!("CARGO_PKG_VERSION"),
        idf_version(),
        settings.adopted
    );
    info!("{diagnostics}");

    let (runtime, parts) = Runtime::new(config, Box::new(display), Box::new(indicator), diagnostics);
    runtime.self_test(&mut sensor, settings.adopted);

    let tasks = runtime.spawn_tasks(parts, Box::new(sensor), Box::new(heater))?;
    let input_timer = poller.start(runtime.input())?;
    Ok(Services {
        tasks,
        _input_timer: input_timer,
    })
}

fn restart() -> ! {
    thread::sleep(Duration::from_millis(RESTART_DELAY_MS));
    unsafe { esp_idf_svc::sys::esp_restart() }
}

fn idf_version() -> String {
    unsafe { CStr::from_ptr(sys::esp_get_idf_version()) }
        .to_string_lossy()
        .into_owned()
}

struct NvsStore {
    partition: EspDefaultNvsPartition,
}

fn unavailable(err: EspError) -> SettingsError {
    SettingsError::Unavailable(err.to_string())
}

impl SettingsStore for NvsStore {
    fn load(&mut self) -> Result<Option<PersistedSettings>, SettingsError> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true).map_err(unavailable)?;
        let mut buffer = vec![0_u8; 256];

        match nvs.get_str(NVS_SETTINGS_KEY, &mut buffer).map_err(unavailable)? {
            Some(value) => PersistedSettings::from_json(value.as_bytes()).map(Some),
            None => Ok(None),
        }
    }

    fn save(&mut self, settings: &PersistedSettings) -> Result<(), SettingsError> {
        let mut nvs =
            EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true).map_err(unavailable)?;
        let payload = serde_json::to_string(settings)
            .map_err(|err| SettingsError::Corrupt(err.to_string()))?;
        nvs.set_str(NVS_SETTINGS_KEY, &payload).map_err(unavailable)?;
        Ok(())
    }
}

/// NTC divider on an ADC1 channel, averaged over a few raw samples.
struct NtcSensor {
    channel: sys::adc1_channel_t,
    params: NtcParams,
}

impl NtcSensor {
    fn new(channel: u32, params: NtcParams) -> anyhow::Result<Self> {
        let rc = unsafe { sys::adc1_config_width(ADC_WIDTH_BIT_12) };
        if rc != sys::ESP_OK {
            return Err(anyhow!("adc1_config_width failed with code {rc}"));
        }
        let rc = unsafe { sys::adc1_config_channel_atten(channel, ADC_ATTEN_DB_11) };
        if rc != sys::ESP_OK {
            return Err(anyhow!("adc1_config_channel_atten failed with code {rc}"));
        }
        info!("NTC sensor on ADC1 channel {channel}");
        Ok(Self { channel, params })
    }
}

impl TemperatureSensor for NtcSensor {
    fn read(&mut self) -> Result<i32, SensorError> {
        let mut total = 0;
        for _ in 0..ADC_SAMPLES {
            let raw = unsafe { sys::adc1_get_raw(self.channel) };
            if raw < 0 {
                return Err(SensorError::Read(format!("adc1_get_raw returned {raw}")));
            }
            total += raw;
        }
        let millivolts = total / ADC_SAMPLES * self.params.vdd_mv / ADC_FULL_SCALE;
        self.params.celsius(millivolts)
    }
}

struct HeaterOutput {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl HeaterOutput {
    fn new(pin: i32) -> anyhow::Result<Self> {
        let mut driver = unsafe { PinDriver::output(AnyOutputPin::new(pin)) }
            .with_context(|| format!("failed to claim heater GPIO{pin}"))?;
        driver.set_low()?;
        Ok(Self { pin: driver })
    }
}

impl Heater for HeaterOutput {
    fn enable(&mut self) {
        if let Err(err) = self.pin.set_high() {
            warn!("failed to switch heater on: {err}");
        }
    }

    fn disable(&mut self) {
        if let Err(err) = self.pin.set_low() {
            warn!("failed to switch heater off: {err}");
        }
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { sys::esp_task_wdt_init(&config) };
    if rc == sys::ESP_OK || rc == sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == sys::ESP_OK || rc == sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { sys::esp_task_wdt_reset() };
}

pub fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
