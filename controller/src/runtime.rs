use std::{
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, SyncSender},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::Context;
use log::{debug, info, warn};

use towelrack_common::{
    ports::{Display, Heater, Indicator, SettingsStore, TemperatureSensor},
    AppAction, AppEngine, AutoOffTimer, ControllerConfig, DisplayContent, DisplayFrame,
    HeatingLoop, IndicatorMode, InputEvent, PersistedSettings, SettingsError,
};

use crate::channel::{input_channel, InputChannel, InputReceiver};

const TASK_STACK_SIZE: usize = 6 * 1024;

/// Engine plus the outputs it drives, behind one lock so every transition is painted
/// before anyone else can observe the engine.
pub struct Core {
    pub engine: AppEngine,
    display: Box<dyn Display>,
    indicator: Box<dyn Indicator>,
}

#[derive(Clone)]
pub struct Runtime {
    core: Arc<Mutex<Core>>,
    input: InputChannel,
    feed: SyncSender<()>,
    config: ControllerConfig,
    diagnostics: Arc<str>,
}

/// Receivers handed to the tasks that own them.
pub struct RuntimeParts {
    pub input: InputReceiver,
    pub feed: Receiver<()>,
}

impl Runtime {
    pub fn new(
        config: ControllerConfig,
        display: Box<dyn Display>,
        indicator: Box<dyn Indicator>,
        diagnostics: String,
    ) -> (Self, RuntimeParts) {
        let engine = AppEngine::new(config);
        let config = engine.config().clone();
        let (input, input_rx) = input_channel(config.input_queue_depth);
        let (feed, feed_rx) = mpsc::sync_channel(1);

        let runtime = Self {
            core: Arc::new(Mutex::new(Core {
                engine,
                display,
                indicator,
            })),
            input,
            feed,
            config,
            diagnostics: diagnostics.into(),
        };
        (
            runtime,
            RuntimeParts {
                input: input_rx,
                feed: feed_rx,
            },
        )
    }

    pub fn input(&self) -> InputChannel {
        self.input.clone()
    }

    pub fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn execute(&self, core: &mut Core, actions: Vec<AppAction>) {
        for action in actions {
            match action {
                AppAction::PowerChanged(power) => info!("power {}", power.as_str()),
                AppAction::FeedIdleWatchdog => {
                    // A pending feed already covers this one.
                    let _ = self.feed.try_send(());
                }
                AppAction::FlushInput => self.input.reset(),
                AppAction::SetIndicator(mode) => core.indicator.set_mode(mode),
                AppAction::Render(frame) => core.display.show(&frame),
                AppAction::ReportDiagnostics => info!("diagnostics: {}", self.diagnostics),
            }
        }
    }

    /// Lamp test on both outputs, then hand over to the idle state.
    pub fn self_test(&self, sensor: &mut dyn TemperatureSensor, adopted: bool) {
        let (indicator, frame) = match sensor.read() {
            Ok(reading) => {
                info!("self-test: sensor reads {reading} C");
                let indicator = if adopted {
                    IndicatorMode::SelfTest
                } else {
                    IndicatorMode::Rainbow
                };
                (indicator, DisplayFrame::LAMP_TEST)
            }
            Err(err) => {
                warn!("self-test: sensor fault: {err}");
                let frame = DisplayFrame {
                    content: DisplayContent::Error,
                    flag_c: false,
                    flag_h: false,
                };
                (IndicatorMode::BreathingRed, frame)
            }
        };

        {
            let mut core = self.lock();
            core.indicator.set_mode(indicator);
            core.display.show(&frame);
        }
        thread::sleep(Duration::from_millis(self.config.self_test_ms));

        let mut core = self.lock();
        let actions = core.engine.start();
        self.execute(&mut core, actions);
    }

    pub fn dispatch(&self, event: InputEvent) {
        let mut core = self.lock();
        let before = core.engine.mode();
        let actions = core.engine.handle_input(event);
        let after = core.engine.mode();
        self.execute(&mut core, actions);

        if before != after {
            info!("mode {} -> {}", before.as_str(), after.as_str());
        }
    }

    pub fn heating_step(
        &self,
        heating: &mut HeatingLoop,
        sensor: &mut dyn TemperatureSensor,
        heater: &mut dyn Heater,
    ) {
        let (power, target) = {
            let core = self.lock();
            (core.engine.power(), core.engine.target_temp())
        };

        let decision = heating.tick(power, target, || sensor.read());
        if let Some(err) = &decision.fault {
            warn!("temperature read failed, heater held off: {err}");
        }
        heater.set(decision.heater_on);
        if let Some(current) = decision.current_c {
            debug!(
                "heating: current={current} target={target} phase={} heater={}",
                heating.phase().as_str(),
                decision.heater_on
            );
        }

        if let Some(phase) = decision.phase_change {
            debug!("heating phase -> {}", phase.as_str());
        }

        // Power may have cycled between ticks, leaving the engine's idle hue behind the loop.
        let mut core = self.lock();
        let actions = core.engine.set_heating_phase(heating.phase());
        self.execute(&mut core, actions);
    }

    pub fn auto_off_arm(&self, timer: &mut AutoOffTimer) -> bool {
        let mut core = self.lock();
        timer.arm(&mut core.engine)
    }

    pub fn auto_off_elapse(&self, timer: &mut AutoOffTimer) {
        let mut core = self.lock();
        let actions = timer.elapse(&mut core.engine);
        if actions.contains(&AppAction::PowerChanged(core.engine.power())) {
            info!("auto-off timer expired");
        } else {
            debug!(
                "auto-off: {} ticks left ({}h shown)",
                timer.remaining_ticks(),
                core.engine.target_duration()
            );
        }
        self.execute(&mut core, actions);
    }

    pub fn idle_timeout(&self) {
        let mut core = self.lock();
        let actions = core.engine.enter_idle_after_inactivity();
        if !actions.is_empty() {
            info!(
                "no input for {}s, back to idle",
                self.config.idle_hold_ms / 1_000
            );
        }
        self.execute(&mut core, actions);
    }

    pub fn spawn_tasks(
        &self,
        parts: RuntimeParts,
        sensor: Box<dyn TemperatureSensor>,
        heater: Box<dyn Heater>,
    ) -> anyhow::Result<Vec<JoinHandle<()>>> {
        Ok(vec![
            self.spawn_input_redirect(parts.input)?,
            self.spawn_heating_loop(sensor, heater)?,
            self.spawn_auto_off_loop()?,
            self.spawn_idle_watchdog(parts.feed)?,
        ])
    }

    fn spawn_input_redirect(&self, input: InputReceiver) -> anyhow::Result<JoinHandle<()>> {
        let runtime = self.clone();
        thread::Builder::new()
            .name("input-redirect".into())
            .stack_size(TASK_STACK_SIZE)
            .spawn(move || {
                while let Some(event) = input.receive() {
                    info!("input: {}", event.as_str());
                    runtime.dispatch(event);
                }
                warn!("input channel closed, input redirect stopping");
            })
            .context("failed to spawn input redirect task")
    }

    fn spawn_heating_loop(
        &self,
        mut sensor: Box<dyn TemperatureSensor>,
        mut heater: Box<dyn Heater>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let runtime = self.clone();
        let period = Duration::from_millis(self.config.heating_period_ms);
        thread::Builder::new()
            .name("heating".into())
            .stack_size(TASK_STACK_SIZE)
            .spawn(move || {
                let mut heating = HeatingLoop::new(&runtime.config);
                loop {
                    runtime.heating_step(&mut heating, sensor.as_mut(), heater.as_mut());
                    thread::sleep(period);
                }
            })
            .context("failed to spawn heating task")
    }

    fn spawn_auto_off_loop(&self) -> anyhow::Result<JoinHandle<()>> {
        let runtime = self.clone();
        let period = Duration::from_millis(self.config.auto_off_period_ms);
        thread::Builder::new()
            .name("auto-off".into())
            .stack_size(TASK_STACK_SIZE)
            .spawn(move || {
                let mut timer = AutoOffTimer::new(&runtime.config);
                loop {
                    let armed = runtime.auto_off_arm(&mut timer);
                    thread::sleep(period);
                    if armed {
                        runtime.auto_off_elapse(&mut timer);
                    }
                }
            })
            .context("failed to spawn auto-off task")
    }

    fn spawn_idle_watchdog(&self, feed: Receiver<()>) -> anyhow::Result<JoinHandle<()>> {
        let runtime = self.clone();
        let hold = Duration::from_millis(self.config.idle_hold_ms);
        thread::Builder::new()
            .name("idle-watchdog".into())
            .stack_size(TASK_STACK_SIZE)
            .spawn(move || loop {
                match feed.recv_timeout(hold) {
                    Ok(()) => {}
                    Err(RecvTimeoutError::Timeout) => runtime.idle_timeout(),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .context("failed to spawn idle watchdog task")
    }
}

/// Loads the persisted record, falling back to defaults. Missing or unreadable records
/// are replaced with defaults when the store is reachable.
pub fn load_settings(store: &mut dyn SettingsStore) -> PersistedSettings {
    let defaults = PersistedSettings::default();
    let rewrite = match store.load() {
        Ok(Some(settings)) => return settings,
        Ok(None) => {
            info!("no stored settings, writing defaults");
            true
        }
        Err(err @ (SettingsError::BadMagic(_) | SettingsError::Corrupt(_))) => {
            warn!("stored settings rejected, writing defaults: {err}");
            true
        }
        Err(err) => {
            warn!("failed to load settings, using defaults: {err}");
            false
        }
    };

    if rewrite {
        if let Err(err) = store.save(&defaults) {
            warn!("failed to write default settings: {err}");
        }
    }
    defaults
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use towelrack_common::{
        config::SETTINGS_MAGIC, ForegroundMode, HeatingPhase, PowerState, SensorError,
    };

    #[derive(Clone, Default)]
    struct Recorder {
        frames: Arc<Mutex<Vec<(bool, bool, Option<i32>)>>>,
        indicator: Arc<Mutex<Vec<IndicatorMode>>>,
    }

    struct FakeDisplay {
        recorder: Recorder,
        flag_c: bool,
        flag_h: bool,
    }

    impl Display for FakeDisplay {
        fn write_digits(&mut self, value: i32) {
            let entry = (self.flag_c, self.flag_h, Some(value));
            self.recorder.frames.lock().unwrap().push(entry);
        }
        fn write_blank(&mut self) {
            let entry = (self.flag_c, self.flag_h, None);
            self.recorder.frames.lock().unwrap().push(entry);
        }
        fn write_error(&mut self) {
            self.write_blank();
        }
        fn set_flag_c(&mut self, lit: bool) {
            self.flag_c = lit;
        }
        fn set_flag_h(&mut self, lit: bool) {
            self.flag_h = lit;
        }
    }

    struct FakeIndicator(Recorder);

    impl Indicator for FakeIndicator {
        fn set_mode(&mut self, mode: IndicatorMode) {
            self.0.indicator.lock().unwrap().push(mode);
        }
    }

    struct ScriptedSensor(Vec<Result<i32, SensorError>>);

    impl TemperatureSensor for ScriptedSensor {
        fn read(&mut self) -> Result<i32, SensorError> {
            if self.0.is_empty() {
                return Err(SensorError::Read("script exhausted".to_string()));
            }
            self.0.remove(0)
        }
    }

    #[derive(Clone, Default)]
    struct FakeHeater(Arc<AtomicBool>);

    impl Heater for FakeHeater {
        fn enable(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
        fn disable(&mut self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    fn runtime_with(config: ControllerConfig) -> (Runtime, RuntimeParts, Recorder) {
        let recorder = Recorder::default();
        let display = FakeDisplay {
            recorder: recorder.clone(),
            flag_c: false,
            flag_h: false,
        };
        let (runtime, parts) = Runtime::new(
            config,
            Box::new(display),
            Box::new(FakeIndicator(recorder.clone())),
            "test".to_string(),
        );
        (runtime, parts, recorder)
    }

    fn fast_config() -> ControllerConfig {
        ControllerConfig {
            self_test_ms: 1,
            idle_hold_ms: 50,
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn stale_edit_does_not_leak_into_the_new_mode() {
        let (runtime, parts, _) = runtime_with(fast_config());
        let input = runtime.input();
        runtime.dispatch(InputEvent::KnobLongPress);
        runtime.dispatch(InputEvent::TouchLeftClick);

        input.send(InputEvent::TouchRightClick).unwrap();
        let switch = parts.input.receive().unwrap();

        // A knob turn meant for the temperature screen lands while the switch is handled.
        input.send(InputEvent::KnobRight).unwrap();
        runtime.dispatch(switch);
        input.send(InputEvent::KnobLeft).unwrap();

        let event = parts.input.receive().unwrap();
        assert_eq!(event, InputEvent::KnobLeft);
        runtime.dispatch(event);

        let core = runtime.lock();
        assert_eq!(core.engine.mode(), ForegroundMode::TimerInteract);
        assert_eq!(core.engine.target_temp(), 50);
        assert_eq!(core.engine.target_duration(), 2);
    }

    #[test]
    fn temperature_edit_renders_c_flag() {
        let (runtime, _parts, recorder) = runtime_with(fast_config());
        runtime.dispatch(InputEvent::KnobLongPress);
        runtime.dispatch(InputEvent::TouchLeftClick);
        for _ in 0..12 {
            runtime.dispatch(InputEvent::KnobRight);
        }

        let frames = recorder.frames.lock().unwrap();
        assert_eq!(frames.last(), Some(&(true, false, Some(60))));
        let indicator = recorder.indicator.lock().unwrap();
        assert_eq!(indicator.last(), Some(&IndicatorMode::EditRed));
    }

    #[test]
    fn heating_step_drives_heater_and_recolors_idle() {
        let (runtime, _parts, recorder) = runtime_with(fast_config());
        runtime.dispatch(InputEvent::KnobLongPress);

        let mut heating = HeatingLoop::new(&runtime.config);
        let mut sensor = ScriptedSensor(vec![Ok(48), Ok(50)]);
        let heater = FakeHeater::default();
        let mut heater_port = heater.clone();

        runtime.heating_step(&mut heating, &mut sensor, &mut heater_port);
        assert!(heater.0.load(Ordering::SeqCst));

        runtime.heating_step(&mut heating, &mut sensor, &mut heater_port);
        assert!(!heater.0.load(Ordering::SeqCst));
        assert_eq!(heating.phase(), HeatingPhase::Satisfied);
        assert_eq!(
            recorder.indicator.lock().unwrap().last(),
            Some(&IndicatorMode::SatisfiedGreen)
        );
    }

    #[test]
    fn quick_power_cycle_keeps_strip_on_heating_phase() {
        let (runtime, _parts, recorder) = runtime_with(fast_config());
        runtime.dispatch(InputEvent::KnobLongPress);

        let mut heating = HeatingLoop::new(&runtime.config);
        let mut sensor = ScriptedSensor(vec![Ok(55); 4]);
        let heater = FakeHeater::default();
        let mut heater_port = heater.clone();

        runtime.heating_step(&mut heating, &mut sensor, &mut heater_port);
        assert_eq!(
            recorder.indicator.lock().unwrap().last(),
            Some(&IndicatorMode::SatisfiedGreen)
        );

        // Off and back on before the heating loop sees the off state.
        runtime.dispatch(InputEvent::KnobLongPress);
        runtime.dispatch(InputEvent::KnobLongPress);
        for _ in 0..3 {
            runtime.heating_step(&mut heating, &mut sensor, &mut heater_port);
        }

        assert_eq!(heating.phase(), HeatingPhase::Satisfied);
        assert!(!heater.0.load(Ordering::SeqCst));
        assert_eq!(
            recorder.indicator.lock().unwrap().last(),
            Some(&IndicatorMode::SatisfiedGreen)
        );
    }

    #[test]
    fn heater_goes_off_on_the_tick_after_power_off() {
        let (runtime, _parts, _) = runtime_with(fast_config());
        runtime.dispatch(InputEvent::KnobLongPress);

        let mut heating = HeatingLoop::new(&runtime.config);
        let mut sensor = ScriptedSensor(vec![Ok(30), Ok(30)]);
        let heater = FakeHeater::default();
        let mut heater_port = heater.clone();

        runtime.heating_step(&mut heating, &mut sensor, &mut heater_port);
        assert!(heater.0.load(Ordering::SeqCst));

        runtime.dispatch(InputEvent::KnobLongPress);
        runtime.heating_step(&mut heating, &mut sensor, &mut heater_port);
        assert!(!heater.0.load(Ordering::SeqCst));
        assert_eq!(runtime.lock().engine.power(), PowerState::Off);
    }

    #[test]
    fn sensor_fault_keeps_heater_off() {
        let (runtime, _parts, _) = runtime_with(fast_config());
        runtime.dispatch(InputEvent::KnobLongPress);

        let mut heating = HeatingLoop::new(&runtime.config);
        let mut sensor = ScriptedSensor(vec![Err(SensorError::OutOfRange(0))]);
        let heater = FakeHeater(Arc::new(AtomicBool::new(true)));
        let mut heater_port = heater.clone();

        runtime.heating_step(&mut heating, &mut sensor, &mut heater_port);
        assert!(!heater.0.load(Ordering::SeqCst));
    }

    #[test]
    fn idle_watchdog_returns_to_idle_after_hold() {
        let (runtime, parts, recorder) = runtime_with(fast_config());
        let handle = runtime.spawn_idle_watchdog(parts.feed).unwrap();
        runtime.dispatch(InputEvent::KnobLongPress);
        runtime.dispatch(InputEvent::TouchRightClick);
        assert_eq!(runtime.lock().engine.mode(), ForegroundMode::TimerInteract);

        thread::sleep(Duration::from_millis(300));

        assert_eq!(runtime.lock().engine.mode(), ForegroundMode::Idle);
        assert_eq!(
            recorder.indicator.lock().unwrap().last(),
            Some(&IndicatorMode::ActiveOrange)
        );
        drop(runtime);
        drop(handle);
    }

    #[test]
    fn auto_off_resyncs_after_edit() {
        let config = ControllerConfig {
            auto_off_ticks_per_hour: 2,
            ..fast_config()
        };
        let (runtime, _parts, _) = runtime_with(config);
        runtime.dispatch(InputEvent::KnobLongPress);
        let mut timer = AutoOffTimer::new(&runtime.config);

        assert!(runtime.auto_off_arm(&mut timer));
        assert_eq!(timer.remaining_ticks(), 6);
        runtime.auto_off_elapse(&mut timer);
        assert_eq!(runtime.lock().engine.target_duration(), 3);

        runtime.dispatch(InputEvent::TouchRightClick);
        runtime.dispatch(InputEvent::KnobLeft);
        runtime.dispatch(InputEvent::KnobLeft);
        assert!(runtime.auto_off_arm(&mut timer));
        assert_eq!(timer.remaining_ticks(), 2);

        runtime.auto_off_elapse(&mut timer);
        assert!(runtime.auto_off_arm(&mut timer));
        runtime.auto_off_elapse(&mut timer);
        assert_eq!(runtime.lock().engine.power(), PowerState::Off);
    }

    #[test]
    fn self_test_hands_over_to_idle_off() {
        let (runtime, _parts, recorder) = runtime_with(fast_config());
        let mut sensor = ScriptedSensor(vec![Ok(21)]);
        runtime.self_test(&mut sensor, true);

        let indicator = recorder.indicator.lock().unwrap();
        assert_eq!(
            *indicator,
            vec![IndicatorMode::SelfTest, IndicatorMode::Off]
        );
        let frames = recorder.frames.lock().unwrap();
        assert_eq!(
            *frames,
            vec![(true, true, Some(88)), (false, false, None)]
        );
    }

    #[test]
    fn self_test_flags_a_dead_sensor() {
        let (runtime, _parts, recorder) = runtime_with(fast_config());
        let mut sensor = ScriptedSensor(Vec::new());
        runtime.self_test(&mut sensor, true);

        let indicator = recorder.indicator.lock().unwrap();
        assert_eq!(indicator.first(), Some(&IndicatorMode::BreathingRed));
    }

    struct MemoryStore {
        stored: Option<Result<Option<PersistedSettings>, SettingsError>>,
        saved: Vec<PersistedSettings>,
    }

    impl SettingsStore for MemoryStore {
        fn load(&mut self) -> Result<Option<PersistedSettings>, SettingsError> {
            self.stored.take().unwrap_or(Ok(None))
        }
        fn save(&mut self, settings: &PersistedSettings) -> Result<(), SettingsError> {
            self.saved.push(*settings);
            Ok(())
        }
    }

    #[test]
    fn first_boot_writes_defaults() {
        let mut store = MemoryStore {
            stored: Some(Ok(None)),
            saved: Vec::new(),
        };
        let settings = load_settings(&mut store);
        assert_eq!(settings, PersistedSettings::default());
        assert_eq!(store.saved, vec![PersistedSettings::default()]);
    }

    #[test]
    fn stored_settings_are_kept() {
        let adopted = PersistedSettings {
            magic: SETTINGS_MAGIC,
            adopted: true,
        };
        let mut store = MemoryStore {
            stored: Some(Ok(Some(adopted))),
            saved: Vec::new(),
        };
        assert_eq!(load_settings(&mut store), adopted);
        assert!(store.saved.is_empty());
    }

    #[test]
    fn unreachable_store_degrades_without_writing() {
        let mut store = MemoryStore {
            stored: Some(Err(SettingsError::Unavailable("nvs".to_string()))),
            saved: Vec::new(),
        };
        assert_eq!(load_settings(&mut store), PersistedSettings::default());
        assert!(store.saved.is_empty());
    }

    #[test]
    fn foreign_record_is_replaced() {
        let mut store = MemoryStore {
            stored: Some(Err(SettingsError::BadMagic(0x12))),
            saved: Vec::new(),
        };
        load_settings(&mut store);
        assert_eq!(store.saved.len(), 1);
    }
}
