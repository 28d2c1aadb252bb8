use crate::{
    app::{AppAction, AppEngine},
    config::ControllerConfig,
};

/// Counts the shutoff duration down in loop ticks, resynchronizing whenever the user
/// edits the duration.
#[derive(Debug, Clone)]
pub struct AutoOffTimer {
    ticks_per_hour: i64,
    remaining_ticks: i64,
}

impl AutoOffTimer {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            ticks_per_hour: i64::from(config.auto_off_ticks_per_hour.max(1)),
            remaining_ticks: 0,
        }
    }

    pub fn remaining_ticks(&self) -> i64 {
        self.remaining_ticks
    }

    /// Start of a cycle. Returns false when no countdown is scheduled.
    pub fn arm(&mut self, engine: &mut AppEngine) -> bool {
        if engine.target_duration() == 0 {
            return false;
        }
        if let Some(hours) = engine.take_duration_dirty() {
            self.remaining_ticks = i64::from(hours) * self.ticks_per_hour;
        }
        true
    }

    /// End of a cycle, after the loop period has passed.
    pub fn elapse(&mut self, engine: &mut AppEngine) -> Vec<AppAction> {
        self.remaining_ticks -= 1;

        if engine.is_duration_dirty() {
            return Vec::new();
        }
        if self.remaining_ticks <= 0 {
            return engine.toggle_power();
        }

        let hours = (self.remaining_ticks + self.ticks_per_hour - 1) / self.ticks_per_hour;
        engine.set_countdown_duration(hours as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        input::InputEvent,
        types::{ForegroundMode, PowerState},
    };

    fn small_config() -> ControllerConfig {
        ControllerConfig {
            auto_off_ticks_per_hour: 4,
            ..ControllerConfig::default()
        }
    }

    #[test]
    fn counts_down_and_powers_off() {
        let config = small_config();
        let mut engine = AppEngine::new(config.clone());
        engine.handle_input(InputEvent::KnobLongPress);
        let mut timer = AutoOffTimer::new(&config);

        let mut shown = Vec::new();
        for _ in 0..11 {
            assert!(timer.arm(&mut engine));
            timer.elapse(&mut engine);
            shown.push(engine.target_duration());
        }
        assert_eq!(shown, vec![3, 3, 3, 2, 2, 2, 2, 1, 1, 1, 1]);
        assert_eq!(engine.power(), PowerState::On);

        assert!(timer.arm(&mut engine));
        let actions = timer.elapse(&mut engine);
        assert!(actions.contains(&AppAction::PowerChanged(PowerState::Off)));
        assert_eq!(engine.power(), PowerState::Off);
        assert!(!timer.arm(&mut engine));
    }

    #[test]
    fn countdown_renders_live_in_timer_mode() {
        let config = small_config();
        let mut engine = AppEngine::new(config.clone());
        engine.handle_input(InputEvent::KnobLongPress);
        engine.handle_input(InputEvent::TouchRightClick);
        let mut timer = AutoOffTimer::new(&config);

        for _ in 0..4 {
            timer.arm(&mut engine);
            timer.elapse(&mut engine);
        }
        assert_eq!(engine.target_duration(), 2);
        assert_eq!(engine.mode(), ForegroundMode::TimerInteract);
    }

    #[test]
    fn edit_between_arm_and_elapse_is_not_clobbered() {
        let config = small_config();
        let mut engine = AppEngine::new(config.clone());
        engine.handle_input(InputEvent::KnobLongPress);
        engine.handle_input(InputEvent::TouchRightClick);
        let mut timer = AutoOffTimer::new(&config);

        timer.arm(&mut engine);
        for _ in 0..3 {
            engine.handle_input(InputEvent::KnobRight);
        }
        assert!(timer.elapse(&mut engine).is_empty());
        assert_eq!(engine.target_duration(), 6);

        timer.arm(&mut engine);
        assert_eq!(timer.remaining_ticks(), 24);
    }

    #[test]
    fn zero_duration_mid_countdown_stops_without_power_off() {
        let config = small_config();
        let mut engine = AppEngine::new(config.clone());
        engine.handle_input(InputEvent::KnobLongPress);
        engine.handle_input(InputEvent::TouchRightClick);
        let mut timer = AutoOffTimer::new(&config);

        assert!(timer.arm(&mut engine));
        for _ in 0..3 {
            engine.handle_input(InputEvent::KnobLeft);
        }
        assert_eq!(engine.target_duration(), 0);

        assert!(timer.elapse(&mut engine).is_empty());
        assert!(!timer.arm(&mut engine));
        assert_eq!(engine.power(), PowerState::On);
        assert_eq!(engine.target_duration(), 0);
    }

    #[test]
    fn delayed_power_on_when_timer_runs_out_while_off() {
        let config = ControllerConfig {
            timer_entry_while_off: true,
            ..small_config()
        };
        let mut engine = AppEngine::new(config.clone());
        engine.handle_input(InputEvent::TouchRightClick);
        engine.handle_input(InputEvent::KnobRight);
        let mut timer = AutoOffTimer::new(&config);

        let mut toggled = false;
        for _ in 0..4 {
            assert!(timer.arm(&mut engine));
            toggled |= timer
                .elapse(&mut engine)
                .contains(&AppAction::PowerChanged(PowerState::On));
        }
        assert!(toggled);
        assert_eq!(engine.power(), PowerState::On);
        assert_eq!(engine.target_duration(), 3);
    }
}
