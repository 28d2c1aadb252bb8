use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerState {
    #[default]
    Off,
    On,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
        }
    }

    pub fn is_on(self) -> bool {
        self == Self::On
    }

    pub fn toggled(self) -> Self {
        match self {
            Self::Off => Self::On,
            Self::On => Self::Off,
        }
    }
}

/// Which quantity the knob edits and the display shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ForegroundMode {
    #[default]
    Idle,
    TempInteract,
    TimerInteract,
}

impl ForegroundMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::TempInteract => "TEMP_INTERACT",
            Self::TimerInteract => "TIMER_INTERACT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HeatingPhase {
    #[default]
    Heating,
    Satisfied,
}

impl HeatingPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Heating => "HEATING",
            Self::Satisfied => "SATISFIED",
        }
    }
}

/// Consistent copy of the shared application state, taken under the engine lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub power: PowerState,
    pub mode: ForegroundMode,
    #[serde(rename = "targetTemp")]
    pub target_temp: i32,
    #[serde(rename = "targetDuration")]
    pub target_duration: i32,
    #[serde(rename = "durationDirty")]
    pub duration_dirty: bool,
}
