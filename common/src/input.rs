use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Click count carried by the raw multi-click code.
pub const RAW_MULTI_CLICK_COUNT: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputEvent {
    KnobLeft,
    KnobRight,
    KnobLongPress,
    KnobMultiClick(u8),
    TouchLeftClick,
    TouchRightClick,
}

impl InputEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KnobLeft => "KNOB_LEFT",
            Self::KnobRight => "KNOB_RIGHT",
            Self::KnobLongPress => "KNOB_LONG_PRESS",
            Self::KnobMultiClick(_) => "KNOB_MULTI_CLICK",
            Self::TouchLeftClick => "TOUCH_LEFT_CLICK",
            Self::TouchRightClick => "TOUCH_RIGHT_CLICK",
        }
    }

    pub fn is_knob_rotation(self) -> bool {
        matches!(self, Self::KnobLeft | Self::KnobRight)
    }
}

impl TryFrom<u8> for InputEvent {
    type Error = InputError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::KnobLeft),
            1 => Ok(Self::KnobRight),
            2 => Ok(Self::KnobLongPress),
            3 => Ok(Self::KnobMultiClick(RAW_MULTI_CLICK_COUNT)),
            4 => Ok(Self::TouchLeftClick),
            5 => Ok(Self::TouchRightClick),
            other => Err(InputError::UnknownCode(other)),
        }
    }
}

impl FromStr for InputEvent {
    type Err = InputError;

    /// Accepts the simulator command words (`l`, `r`, `long`, `click 8`, `tl`, `tr`)
    /// as well as the raw numeric codes.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let mut parts = trimmed.split_whitespace();
        let word = parts.next().unwrap_or_default().to_ascii_lowercase();

        if let Ok(code) = word.parse::<u8>() {
            return Self::try_from(code);
        }

        match word.as_str() {
            "l" | "left" | "ccw" => Ok(Self::KnobLeft),
            "r" | "right" | "cw" => Ok(Self::KnobRight),
            "long" | "power" => Ok(Self::KnobLongPress),
            "click" | "clicks" => {
                let count = match parts.next() {
                    Some(raw) => raw
                        .parse::<u8>()
                        .map_err(|_| InputError::UnknownCommand(trimmed.to_string()))?,
                    None => RAW_MULTI_CLICK_COUNT,
                };
                Ok(Self::KnobMultiClick(count))
            }
            "tl" | "temp" => Ok(Self::TouchLeftClick),
            "tr" | "timer" => Ok(Self::TouchRightClick),
            _ => Err(InputError::UnknownCommand(trimmed.to_string())),
        }
    }
}

/// Turns A/B encoder levels into one rotation event per detent.
#[derive(Debug, Clone, Default)]
pub struct QuadratureDecoder {
    state: u8,
    steps: i8,
}

const QUADRATURE_TABLE: [i8; 16] = [0, -1, 1, 0, 1, 0, 0, -1, -1, 0, 0, 1, 0, 1, -1, 0];
const STEPS_PER_DETENT: i8 = 4;

impl QuadratureDecoder {
    pub fn new(a: bool, b: bool) -> Self {
        Self {
            state: Self::encode(a, b),
            steps: 0,
        }
    }

    fn encode(a: bool, b: bool) -> u8 {
        (u8::from(a) << 1) | u8::from(b)
    }

    pub fn update(&mut self, a: bool, b: bool) -> Option<InputEvent> {
        let next = Self::encode(a, b);
        if next == self.state {
            return None;
        }

        let index = usize::from((self.state << 2) | next);
        self.state = next;
        self.steps += QUADRATURE_TABLE[index];

        if self.steps >= STEPS_PER_DETENT {
            self.steps = 0;
            Some(InputEvent::KnobRight)
        } else if self.steps <= -STEPS_PER_DETENT {
            self.steps = 0;
            Some(InputEvent::KnobLeft)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GestureTiming {
    pub debounce_ms: u64,
    pub long_press_ms: u64,
    pub click_gap_ms: u64,
}

impl Default for GestureTiming {
    fn default() -> Self {
        Self {
            debounce_ms: 20,
            long_press_ms: 1_500,
            click_gap_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Clicks(u8),
    LongPress,
}

impl Gesture {
    /// Knob push button: long press toggles power, bursts of two or more clicks are
    /// reported with their count. Single clicks carry no meaning.
    pub fn knob_event(self) -> Option<InputEvent> {
        match self {
            Self::LongPress => Some(InputEvent::KnobLongPress),
            Self::Clicks(count) if count >= 2 => Some(InputEvent::KnobMultiClick(count)),
            Self::Clicks(_) => None,
        }
    }
}

/// Debounced button state machine emitting click bursts and long presses.
#[derive(Debug, Clone)]
pub struct ButtonGestures {
    timing: GestureTiming,
    pressed: bool,
    pending: Option<(bool, u64)>,
    press_started_ms: u64,
    long_fired: bool,
    clicks: u8,
    last_release_ms: u64,
}

impl ButtonGestures {
    pub fn new(timing: GestureTiming) -> Self {
        Self {
            timing,
            pressed: false,
            pending: None,
            press_started_ms: 0,
            long_fired: false,
            clicks: 0,
            last_release_ms: 0,
        }
    }

    pub fn update(&mut self, pressed: bool, now_ms: u64) -> Option<Gesture> {
        if pressed != self.pressed {
            match self.pending {
                Some((level, since)) if level == pressed => {
                    if now_ms.saturating_sub(since) >= self.timing.debounce_ms {
                        self.pending = None;
                        return self.commit(pressed, now_ms);
                    }
                }
                _ => self.pending = Some((pressed, now_ms)),
            }
        } else {
            self.pending = None;
        }

        if self.pressed {
            if !self.long_fired
                && now_ms.saturating_sub(self.press_started_ms) >= self.timing.long_press_ms
            {
                self.long_fired = true;
                self.clicks = 0;
                return Some(Gesture::LongPress);
            }
        } else if self.clicks > 0
            && now_ms.saturating_sub(self.last_release_ms) >= self.timing.click_gap_ms
        {
            let clicks = self.clicks;
            self.clicks = 0;
            return Some(Gesture::Clicks(clicks));
        }

        None
    }

    fn commit(&mut self, pressed: bool, now_ms: u64) -> Option<Gesture> {
        self.pressed = pressed;
        if pressed {
            self.press_started_ms = now_ms;
            self.long_fired = false;
        } else if !self.long_fired {
            self.clicks = self.clicks.saturating_add(1);
            self.last_release_ms = now_ms;
        }
        None
    }
}
