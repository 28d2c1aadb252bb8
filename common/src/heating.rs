use crate::{
    config::ControllerConfig,
    error::SensorError,
    types::{HeatingPhase, PowerState},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeatingDecision {
    pub heater_on: bool,
    pub current_c: Option<i32>,
    pub phase_change: Option<HeatingPhase>,
    pub fault: Option<SensorError>,
}

/// Rests after reaching target until the reading falls below `target - band`.
#[derive(Debug, Clone)]
pub struct HeatingLoop {
    band_c: i32,
    failsafe_c: i32,
    phase: HeatingPhase,
}

impl HeatingLoop {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            band_c: config.hysteresis_c,
            failsafe_c: config.sensor_failsafe_c,
            phase: HeatingPhase::Heating,
        }
    }

    pub fn phase(&self) -> HeatingPhase {
        self.phase
    }

    pub fn tick<F>(&mut self, power: PowerState, target_c: i32, read: F) -> HeatingDecision
    where
        F: FnOnce() -> Result<i32, SensorError>,
    {
        if !power.is_on() {
            self.phase = HeatingPhase::Heating;
            return HeatingDecision {
                heater_on: false,
                current_c: None,
                phase_change: None,
                fault: None,
            };
        }

        let (current_c, fault) = match read() {
            Ok(value) => (value, None),
            Err(err) => (self.failsafe_c, Some(err)),
        };

        let heater_on = self.phase == HeatingPhase::Heating && current_c < target_c;
        let next = match self.phase {
            HeatingPhase::Heating if current_c >= target_c => HeatingPhase::Satisfied,
            HeatingPhase::Satisfied if current_c < target_c - self.band_c => HeatingPhase::Heating,
            phase => phase,
        };
        let phase_change = (next != self.phase).then_some(next);
        self.phase = next;

        HeatingDecision {
            heater_on,
            current_c: Some(current_c),
            phase_change,
            fault,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(readings: &[i32], target: i32) -> (Vec<bool>, Vec<Option<HeatingPhase>>) {
        let mut heating = HeatingLoop::new(&ControllerConfig::default());
        readings
            .iter()
            .map(|&value| {
                let decision = heating.tick(PowerState::On, target, || Ok(value));
                (decision.heater_on, decision.phase_change)
            })
            .unzip()
    }

    #[test]
    fn banded_hysteresis_sequence() {
        let (heater, phases) = run(&[48, 50, 51, 44, 45], 50);
        assert_eq!(heater, vec![true, false, false, false, true]);
        assert_eq!(
            phases,
            vec![
                None,
                Some(HeatingPhase::Satisfied),
                None,
                Some(HeatingPhase::Heating),
                None
            ]
        );
    }

    #[test]
    fn stays_resting_inside_the_band() {
        let (heater, _) = run(&[50, 49, 47, 45, 46], 50);
        assert_eq!(heater, vec![false; 5]);
    }

    #[test]
    fn power_off_forces_heater_off_without_reading() {
        let mut heating = HeatingLoop::new(&ControllerConfig::default());
        heating.tick(PowerState::On, 50, || Ok(55));
        assert_eq!(heating.phase(), HeatingPhase::Satisfied);

        let decision = heating.tick(PowerState::Off, 50, || panic!("sensor read while off"));
        assert!(!decision.heater_on);
        assert_eq!(decision.current_c, None);
        assert_eq!(heating.phase(), HeatingPhase::Heating);
    }

    #[test]
    fn sensor_fault_fails_safe() {
        let mut heating = HeatingLoop::new(&ControllerConfig::default());
        let decision = heating.tick(PowerState::On, 60, || {
            Err(SensorError::Read("adc timeout".to_string()))
        });

        assert!(!decision.heater_on);
        assert_eq!(decision.current_c, Some(100));
        assert!(decision.fault.is_some());
        assert_eq!(decision.phase_change, Some(HeatingPhase::Satisfied));
    }
}
