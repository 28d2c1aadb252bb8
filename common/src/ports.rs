//! Collaborator interfaces the application core drives.

use crate::{
    config::PersistedSettings,
    display::{DisplayContent, DisplayFrame},
    error::{SensorError, SettingsError},
    indicator::IndicatorMode,
};

/// Flags are latched on the next write.
pub trait Display: Send {
    fn write_digits(&mut self, value: i32);
    fn write_blank(&mut self);
    fn write_error(&mut self);
    fn set_flag_c(&mut self, lit: bool);
    fn set_flag_h(&mut self, lit: bool);

    fn show(&mut self, frame: &DisplayFrame) {
        self.set_flag_c(frame.flag_c);
        self.set_flag_h(frame.flag_h);
        match frame.content {
            DisplayContent::Blank => self.write_blank(),
            DisplayContent::Number(value) => self.write_digits(value),
            DisplayContent::Error => self.write_error(),
        }
    }
}

pub trait Indicator: Send {
    fn set_mode(&mut self, mode: IndicatorMode);
}

pub trait TemperatureSensor: Send {
    fn read(&mut self) -> Result<i32, SensorError>;
}

pub trait Heater: Send {
    fn enable(&mut self);
    fn disable(&mut self);

    fn set(&mut self, on: bool) {
        if on {
            self.enable();
        } else {
            self.disable();
        }
    }
}

pub trait SettingsStore: Send {
    /// `Ok(None)` when nothing has been stored yet.
    fn load(&mut self) -> Result<Option<PersistedSettings>, SettingsError>;
    fn save(&mut self, settings: &PersistedSettings) -> Result<(), SettingsError>;
}
