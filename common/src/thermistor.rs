use serde::{Deserialize, Serialize};

use crate::error::SensorError;

const KELVIN_OFFSET: f64 = 273.15;
const REFERENCE_KELVIN: f64 = 25.0 + KELVIN_OFFSET;

/// NTC divider parameters. With `ntc_to_ground` the thermistor sits between the ADC
/// node and ground and the fixed resistor pulls up to `vdd_mv`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NtcParams {
    pub beta: f64,
    pub r25_ohm: f64,
    pub fixed_ohm: f64,
    pub vdd_mv: i32,
    pub ntc_to_ground: bool,
}

impl Default for NtcParams {
    fn default() -> Self {
        Self {
            beta: 3950.0,
            r25_ohm: 10_000.0,
            fixed_ohm: 10_000.0,
            vdd_mv: 3300,
            ntc_to_ground: true,
        }
    }
}

impl NtcParams {
    pub fn resistance_ohm(&self, millivolts: i32) -> Result<f64, SensorError> {
        if millivolts <= 0 || millivolts >= self.vdd_mv {
            return Err(SensorError::OutOfRange(millivolts));
        }
        let v = f64::from(millivolts);
        let rest = f64::from(self.vdd_mv) - v;
        Ok(if self.ntc_to_ground {
            self.fixed_ohm * v / rest
        } else {
            self.fixed_ohm * rest / v
        })
    }

    /// Beta equation, rounded to whole degrees Celsius.
    pub fn celsius(&self, millivolts: i32) -> Result<i32, SensorError> {
        let resistance = self.resistance_ohm(millivolts)?;
        let inverse = 1.0 / REFERENCE_KELVIN + (resistance / self.r25_ohm).ln() / self.beta;
        Ok((1.0 / inverse - KELVIN_OFFSET).round() as i32)
    }
}
