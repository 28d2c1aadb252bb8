use crate::{
    config::ControllerConfig,
    display::{DisplayContent, DisplayFrame},
    indicator::IndicatorMode,
    input::InputEvent,
    types::{ForegroundMode, HeatingPhase, PowerState, StateSnapshot},
};

/// Executed in order under the engine lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppAction {
    PowerChanged(PowerState),
    FeedIdleWatchdog,
    FlushInput,
    SetIndicator(IndicatorMode),
    Render(DisplayFrame),
    ReportDiagnostics,
}

#[derive(Debug, Clone)]
pub struct AppEngine {
    config: ControllerConfig,
    power: PowerState,
    mode: ForegroundMode,
    target_temp: i32,
    target_duration: i32,
    duration_dirty: bool,
    idle_indicator: IndicatorMode,
}

impl AppEngine {
    pub fn new(mut config: ControllerConfig) -> Self {
        config.sanitize();
        Self {
            config,
            power: PowerState::Off,
            mode: ForegroundMode::Idle,
            target_temp: 0,
            target_duration: 0,
            duration_dirty: true,
            idle_indicator: IndicatorMode::Off,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn power(&self) -> PowerState {
        self.power
    }

    pub fn mode(&self) -> ForegroundMode {
        self.mode
    }

    pub fn target_temp(&self) -> i32 {
        self.target_temp
    }

    pub fn target_duration(&self) -> i32 {
        self.target_duration
    }

    pub fn is_duration_dirty(&self) -> bool {
        self.duration_dirty
    }

    pub fn idle_indicator(&self) -> IndicatorMode {
        self.idle_indicator
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            power: self.power,
            mode: self.mode,
            target_temp: self.target_temp,
            target_duration: self.target_duration,
            duration_dirty: self.duration_dirty,
        }
    }

    pub fn start(&mut self) -> Vec<AppAction> {
        self.switch_mode(ForegroundMode::Idle)
    }

    pub fn handle_input(&mut self, event: InputEvent) -> Vec<AppAction> {
        if event == InputEvent::KnobLongPress {
            return self.toggle_power();
        }

        if self.power.is_on() {
            self.handle_active_input(event)
        } else {
            self.handle_sleep_input(event)
        }
    }

    fn handle_active_input(&mut self, event: InputEvent) -> Vec<AppAction> {
        match event {
            InputEvent::TouchLeftClick => self.switch_mode(ForegroundMode::TempInteract),
            InputEvent::TouchRightClick => self.switch_mode(ForegroundMode::TimerInteract),
            event if event.is_knob_rotation() => self.edit(event),
            _ => Vec::new(),
        }
    }

    fn handle_sleep_input(&mut self, event: InputEvent) -> Vec<AppAction> {
        match event {
            InputEvent::KnobMultiClick(clicks)
                if clicks == self.config.diagnostic_clicks && self.mode == ForegroundMode::Idle =>
            {
                vec![AppAction::ReportDiagnostics]
            }
            InputEvent::TouchRightClick if self.config.timer_entry_while_off => {
                self.switch_mode(ForegroundMode::TimerInteract)
            }
            event if event.is_knob_rotation() && self.mode == ForegroundMode::TimerInteract => {
                self.edit(event)
            }
            _ => Vec::new(),
        }
    }

    fn edit(&mut self, event: InputEvent) -> Vec<AppAction> {
        let delta = if event == InputEvent::KnobRight { 1 } else { -1 };
        let boundary = self.config.boundary;

        match self.mode {
            ForegroundMode::TempInteract => {
                self.target_temp = boundary.apply(
                    self.target_temp + delta,
                    self.config.temp_min_c,
                    self.config.temp_max_c,
                );
            }
            ForegroundMode::TimerInteract => {
                self.target_duration = boundary.apply(
                    self.target_duration + delta,
                    0,
                    self.config.duration_max_hours,
                );
                self.duration_dirty = true;
            }
            ForegroundMode::Idle => return Vec::new(),
        }

        vec![
            AppAction::FeedIdleWatchdog,
            AppAction::Render(self.refresh_display()),
        ]
    }

    pub fn toggle_power(&mut self) -> Vec<AppAction> {
        self.power = self.power.toggled();

        if self.power.is_on() {
            self.idle_indicator = IndicatorMode::ActiveOrange;
            self.target_temp = self.config.temp_default_c;
            self.target_duration = self.config.duration_default_hours;
        } else {
            self.idle_indicator = IndicatorMode::Off;
            self.target_temp = 0;
            self.target_duration = 0;
        }
        self.duration_dirty = true;

        let mut actions = vec![AppAction::PowerChanged(self.power)];
        actions.extend(self.switch_mode(ForegroundMode::Idle));
        actions
    }

    pub fn switch_mode(&mut self, mode: ForegroundMode) -> Vec<AppAction> {
        let allowed = match mode {
            ForegroundMode::Idle => true,
            ForegroundMode::TempInteract => self.power.is_on(),
            ForegroundMode::TimerInteract => {
                self.power.is_on() || self.config.timer_entry_while_off
            }
        };
        if !allowed {
            return Vec::new();
        }

        self.mode = mode;
        let indicator = match mode {
            ForegroundMode::Idle => self.idle_indicator,
            ForegroundMode::TempInteract => IndicatorMode::EditRed,
            ForegroundMode::TimerInteract => IndicatorMode::EditBlue,
        };

        vec![
            AppAction::FeedIdleWatchdog,
            AppAction::FlushInput,
            AppAction::SetIndicator(indicator),
            AppAction::Render(self.refresh_display()),
        ]
    }

    pub fn refresh_display(&self) -> DisplayFrame {
        let on = self.power.is_on();
        let content = match self.mode {
            ForegroundMode::TempInteract => DisplayContent::Number(self.target_temp),
            ForegroundMode::TimerInteract => DisplayContent::Number(self.target_duration),
            ForegroundMode::Idle if on => DisplayContent::Number(self.target_temp),
            ForegroundMode::Idle => DisplayContent::Blank,
        };

        DisplayFrame {
            content,
            flag_c: self.mode == ForegroundMode::TempInteract
                || (on && self.mode == ForegroundMode::Idle),
            flag_h: self.mode == ForegroundMode::TimerInteract,
        }
    }

    pub fn set_heating_phase(&mut self, phase: HeatingPhase) -> Vec<AppAction> {
        if !self.power.is_on() {
            return Vec::new();
        }

        let indicator = match phase {
            HeatingPhase::Heating => IndicatorMode::ActiveOrange,
            HeatingPhase::Satisfied => IndicatorMode::SatisfiedGreen,
        };
        if indicator == self.idle_indicator {
            return Vec::new();
        }

        self.idle_indicator = indicator;
        if self.mode == ForegroundMode::Idle {
            vec![AppAction::SetIndicator(indicator)]
        } else {
            Vec::new()
        }
    }

    pub fn enter_idle_after_inactivity(&mut self) -> Vec<AppAction> {
        if self.mode == ForegroundMode::Idle {
            return Vec::new();
        }
        self.switch_mode(ForegroundMode::Idle)
    }

    pub fn take_duration_dirty(&mut self) -> Option<i32> {
        if !self.duration_dirty {
            return None;
        }
        self.duration_dirty = false;
        Some(self.target_duration)
    }

    /// Does not mark the duration as user-edited.
    pub fn set_countdown_duration(&mut self, hours: i32) -> Vec<AppAction> {
        self.target_duration = hours.clamp(0, self.config.duration_max_hours);
        if self.mode == ForegroundMode::TimerInteract {
            vec![AppAction::Render(self.refresh_display())]
        } else {
            Vec::new()
        }
    }
}
