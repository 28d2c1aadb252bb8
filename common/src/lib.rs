pub mod app;
pub mod auto_off;
pub mod config;
pub mod display;
pub mod error;
pub mod heating;
pub mod indicator;
pub mod input;
pub mod ports;
pub mod thermistor;
pub mod types;

pub use app::{AppAction, AppEngine};
pub use auto_off::AutoOffTimer;
pub use config::{BoundaryPolicy, ControllerConfig, HardwareConfig, PersistedSettings};
pub use display::{DisplayContent, DisplayFrame};
pub use error::{InputError, SensorError, SettingsError};
pub use heating::{HeatingDecision, HeatingLoop};
pub use indicator::{IndicatorMode, Pattern, Rgb, Step};
pub use input::InputEvent;
pub use thermistor::NtcParams;
pub use types::{ForegroundMode, HeatingPhase, PowerState, StateSnapshot};
