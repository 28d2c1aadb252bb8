use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Self = Self::new(0, 0, 0);
    pub const WHITE: Self = Self::new(255, 255, 255);
    pub const ORANGE: Self = Self::new(255, 76, 10);
    pub const RED: Self = Self::new(255, 0, 0);
    pub const GREEN: Self = Self::new(76, 255, 10);
    pub const BLUE: Self = Self::new(0, 0, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn scaled(self, percent: u8) -> Self {
        let percent = u16::from(percent.min(100));
        let scale = |channel: u8| ((u16::from(channel) * percent) / 100) as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }

    /// Fully saturated color at `hue` degrees.
    pub fn from_hue(hue: u16) -> Self {
        let hue = hue % 360;
        let sector = hue / 60;
        let rising = ((hue % 60) * 255 / 60) as u8;
        let falling = 255 - rising;
        match sector {
            0 => Self::new(255, rising, 0),
            1 => Self::new(falling, 255, 0),
            2 => Self::new(0, 255, rising),
            3 => Self::new(0, falling, 255),
            4 => Self::new(rising, 0, 255),
            _ => Self::new(255, 0, falling),
        }
    }
}

/// Symbolic strip modes the application selects by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorMode {
    #[default]
    Off,
    SelfTest,
    ActiveOrange,
    SatisfiedGreen,
    EditRed,
    EditBlue,
    BreathingRed,
    Rainbow,
}

impl IndicatorMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::SelfTest => "self-test",
            Self::ActiveOrange => "active-orange",
            Self::SatisfiedGreen => "satisfied-green",
            Self::EditRed => "edit-red",
            Self::EditBlue => "edit-blue",
            Self::BreathingRed => "breathing-red",
            Self::Rainbow => "rainbow",
        }
    }

    pub fn pattern(self) -> Pattern {
        match self {
            Self::Off => Pattern::solid(Rgb::OFF),
            Self::SelfTest => Pattern::solid(Rgb::WHITE),
            Self::ActiveOrange => Pattern::solid(Rgb::ORANGE),
            Self::SatisfiedGreen => Pattern::solid(Rgb::GREEN),
            Self::EditRed => Pattern::solid(Rgb::RED),
            Self::EditBlue => Pattern::solid(Rgb::BLUE),
            Self::BreathingRed => Pattern::breathing(Rgb::RED, BREATH_HALF_PERIOD_MS),
            Self::Rainbow => Pattern::rainbow(RAINBOW_PERIOD_MS),
        }
    }
}

const BREATH_HALF_PERIOD_MS: u64 = 1_000;
const BREATH_STEPS: u64 = 20;
const RAINBOW_PERIOD_MS: u64 = 5_000;
const RAINBOW_STEPS: u64 = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub color: Rgb,
    pub hold_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    /// Play once, then keep the last color.
    Once,
    Loop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub steps: Vec<Step>,
    pub repeat: Repeat,
}

impl Pattern {
    pub fn solid(color: Rgb) -> Self {
        Self {
            steps: vec![Step { color, hold_ms: 0 }],
            repeat: Repeat::Once,
        }
    }

    pub fn breathing(color: Rgb, half_period_ms: u64) -> Self {
        let hold_ms = half_period_ms / BREATH_STEPS;
        let rise = (0..=BREATH_STEPS).map(|i| (i * 100 / BREATH_STEPS) as u8);
        let fall = (1..BREATH_STEPS).rev().map(|i| (i * 100 / BREATH_STEPS) as u8);
        let steps = rise
            .chain(fall)
            .map(|percent| Step {
                color: color.scaled(percent),
                hold_ms,
            })
            .collect();
        Self {
            steps,
            repeat: Repeat::Loop,
        }
    }

    pub fn rainbow(period_ms: u64) -> Self {
        let hold_ms = period_ms / RAINBOW_STEPS;
        let steps = (0..RAINBOW_STEPS)
            .map(|i| Step {
                color: Rgb::from_hue((i * 360 / RAINBOW_STEPS) as u16),
                hold_ms,
            })
            .collect();
        Self {
            steps,
            repeat: Repeat::Loop,
        }
    }

    pub fn cursor(self) -> PatternCursor {
        PatternCursor {
            pattern: self,
            index: 0,
        }
    }
}

/// Walks a pattern step by step. `None` means hold the current color.
#[derive(Debug, Clone)]
pub struct PatternCursor {
    pattern: Pattern,
    index: usize,
}

impl PatternCursor {
    pub fn next_step(&mut self) -> Option<Step> {
        if self.pattern.steps.is_empty() {
            return None;
        }
        if self.index >= self.pattern.steps.len() {
            match self.pattern.repeat {
                Repeat::Once => return None,
                Repeat::Loop => self.index = 0,
            }
        }
        let step = self.pattern.steps[self.index];
        self.index += 1;
        Some(step)
    }
}
