use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SensorError {
    #[error("sensor voltage {0} mV outside the divider range")]
    OutOfRange(i32),
    #[error("sensor read failed: {0}")]
    Read(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("settings record has magic {0:#04x}")]
    BadMagic(u8),
    #[error("settings record is corrupt: {0}")]
    Corrupt(String),
    #[error("settings storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("unknown input code {0}")]
    UnknownCode(u8),
    #[error("unknown input command `{0}`")]
    UnknownCommand(String),
}
