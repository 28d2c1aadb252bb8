use serde::{Deserialize, Serialize};

use crate::error::SettingsError;

pub const SETTINGS_MAGIC: u8 = 0xEE;

/// What a knob edit does when it would leave the allowed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPolicy {
    #[default]
    Clamp,
    Wrap,
}

impl BoundaryPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clamp => "clamp",
            Self::Wrap => "wrap",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "clamp" => Some(Self::Clamp),
            "wrap" => Some(Self::Wrap),
            _ => None,
        }
    }

    pub fn apply(self, value: i32, min: i32, max: i32) -> i32 {
        match self {
            Self::Clamp => value.clamp(min, max),
            Self::Wrap if value < min => max,
            Self::Wrap if value > max => min,
            Self::Wrap => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub temp_min_c: i32,
    pub temp_max_c: i32,
    pub temp_default_c: i32,
    pub duration_max_hours: i32,
    pub duration_default_hours: i32,
    pub heating_period_ms: u64,
    pub auto_off_period_ms: u64,
    pub auto_off_ticks_per_hour: u32,
    pub hysteresis_c: i32,
    pub idle_hold_ms: u64,
    pub input_queue_depth: usize,
    pub sensor_failsafe_c: i32,
    pub diagnostic_clicks: u8,
    pub self_test_ms: u64,
    #[serde(default)]
    pub boundary: BoundaryPolicy,
    #[serde(default)]
    pub timer_entry_while_off: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            temp_min_c: 40,
            temp_max_c: 60,
            temp_default_c: 50,
            duration_max_hours: 24,
            duration_default_hours: 3,
            heating_period_ms: 1_000,
            auto_off_period_ms: 3_000,
            auto_off_ticks_per_hour: 1_200,
            hysteresis_c: 5,
            idle_hold_ms: 10_000,
            input_queue_depth: 10,
            sensor_failsafe_c: 100,
            diagnostic_clicks: 8,
            self_test_ms: 2_000,
            boundary: BoundaryPolicy::Clamp,
            timer_entry_while_off: false,
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();

        if self.temp_min_c > self.temp_max_c {
            std::mem::swap(&mut self.temp_min_c, &mut self.temp_max_c);
        }
        self.temp_default_c = self.temp_default_c.clamp(self.temp_min_c, self.temp_max_c);

        self.duration_max_hours = self.duration_max_hours.clamp(1, 99);
        self.duration_default_hours = self
            .duration_default_hours
            .clamp(0, self.duration_max_hours);

        if self.heating_period_ms == 0 {
            self.heating_period_ms = defaults.heating_period_ms;
        }
        if self.auto_off_period_ms == 0 {
            self.auto_off_period_ms = defaults.auto_off_period_ms;
        }
        if self.auto_off_ticks_per_hour == 0 {
            self.auto_off_ticks_per_hour = defaults.auto_off_ticks_per_hour;
        }
        if self.idle_hold_ms == 0 {
            self.idle_hold_ms = defaults.idle_hold_ms;
        }

        self.hysteresis_c = self.hysteresis_c.clamp(0, 20);
        self.input_queue_depth = self.input_queue_depth.clamp(1, 64);
        if self.diagnostic_clicks < 2 {
            self.diagnostic_clicks = defaults.diagnostic_clicks;
        }
    }
}

/// Pin map and strip geometry of the TowelRack controller board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareConfig {
    pub shift_data_pin: i32,
    pub shift_clock_pin: i32,
    pub shift_latch_pin: i32,
    pub digit1_select_pin: i32,
    pub digit2_select_pin: i32,
    pub knob_a_pin: i32,
    pub knob_b_pin: i32,
    pub knob_button_pin: i32,
    pub touch_left_pin: i32,
    pub touch_right_pin: i32,
    pub strip_pin: i32,
    pub strip_len: usize,
    pub strip_brightness_pct: u8,
    pub ntc_adc_channel: u32,
    pub heater_pin: i32,
    pub display_refresh_us: u64,
    pub input_poll_ms: u64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            shift_data_pin: 10,
            shift_clock_pin: 18,
            shift_latch_pin: 19,
            digit1_select_pin: 7,
            digit2_select_pin: 6,
            knob_a_pin: 2,
            knob_b_pin: 3,
            knob_button_pin: 9,
            touch_left_pin: 4,
            touch_right_pin: 5,
            strip_pin: 8,
            strip_len: 4,
            strip_brightness_pct: 50,
            ntc_adc_channel: 0,
            heater_pin: 1,
            display_refresh_us: 1_000,
            input_poll_ms: 2,
        }
    }
}

impl HardwareConfig {
    pub fn sanitize(&mut self) {
        let defaults = Self::default();
        self.strip_len = self.strip_len.clamp(1, 64);
        self.strip_brightness_pct = self.strip_brightness_pct.min(100);
        self.display_refresh_us = self.display_refresh_us.clamp(250, 5_000);
        if self.input_poll_ms == 0 {
            self.input_poll_ms = defaults.input_poll_ms;
        }
    }
}

/// Record kept in non-volatile storage across reboots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    pub magic: u8,
    pub adopted: bool,
}

impl Default for PersistedSettings {
    fn default() -> Self {
        Self {
            magic: SETTINGS_MAGIC,
            adopted: false,
        }
    }
}

impl PersistedSettings {
    pub fn from_json(raw: &[u8]) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_slice(raw)
            .map_err(|err| SettingsError::Corrupt(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.magic != SETTINGS_MAGIC {
            return Err(SettingsError::BadMagic(self.magic));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_the_appliance_profile() {
        let config = ControllerConfig::default();
        assert_eq!(config.temp_default_c, 50);
        assert_eq!(config.duration_default_hours, 3);
        assert_eq!((config.temp_min_c, config.temp_max_c), (40, 60));
        assert_eq!(config.auto_off_ticks_per_hour, 1_200);
        assert_eq!(config.boundary, BoundaryPolicy::Clamp);
    }

    #[test]
    fn clamp_policy_saturates() {
        assert_eq!(BoundaryPolicy::Clamp.apply(61, 40, 60), 60);
        assert_eq!(BoundaryPolicy::Clamp.apply(39, 40, 60), 40);
        assert_eq!(BoundaryPolicy::Clamp.apply(-1, 0, 24), 0);
    }

    #[test]
    fn wrap_policy_jumps_to_the_other_bound() {
        assert_eq!(BoundaryPolicy::Wrap.apply(61, 40, 60), 40);
        assert_eq!(BoundaryPolicy::Wrap.apply(39, 40, 60), 60);
        assert_eq!(BoundaryPolicy::Wrap.apply(-1, 0, 24), 24);
        assert_eq!(BoundaryPolicy::Wrap.apply(12, 0, 24), 12);
    }

    #[test]
    fn sanitize_repairs_inverted_ranges_and_zero_periods() {
        let mut config = ControllerConfig {
            temp_min_c: 70,
            temp_max_c: 30,
            temp_default_c: 90,
            heating_period_ms: 0,
            auto_off_ticks_per_hour: 0,
            diagnostic_clicks: 1,
            ..ControllerConfig::default()
        };
        config.sanitize();

        assert_eq!((config.temp_min_c, config.temp_max_c), (30, 70));
        assert_eq!(config.temp_default_c, 70);
        assert_eq!(config.heating_period_ms, 1_000);
        assert_eq!(config.auto_off_ticks_per_hour, 1_200);
        assert_eq!(config.diagnostic_clicks, 8);
    }

    #[test]
    fn settings_with_foreign_magic_are_rejected() {
        let raw = br#"{"magic":17,"adopted":true}"#;
        assert_eq!(
            PersistedSettings::from_json(raw),
            Err(SettingsError::BadMagic(17))
        );

        let raw = br#"{"magic":238,"adopted":true}"#;
        assert_eq!(
            PersistedSettings::from_json(raw),
            Ok(PersistedSettings {
                magic: SETTINGS_MAGIC,
                adopted: true
            })
        );
    }

    #[test]
    fn garbage_settings_are_corrupt() {
        assert!(matches!(
            PersistedSettings::from_json(b"not json"),
            Err(SettingsError::Corrupt(_))
        ));
    }

    #[test]
    fn boundary_parses_from_env_strings() {
        assert_eq!(BoundaryPolicy::parse(" Wrap "), Some(BoundaryPolicy::Wrap));
        assert_eq!(BoundaryPolicy::parse("clamp"), Some(BoundaryPolicy::Clamp));
        assert_eq!(BoundaryPolicy::parse("saturate"), None);
    }
}
