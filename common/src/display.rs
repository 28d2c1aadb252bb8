use serde::Serialize;

/// Number of seven-segment digits on the front panel.
pub const DIGIT_COUNT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayContent {
    Blank,
    Number(i32),
    Error,
}

/// Everything the panel should show; derived from application state only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisplayFrame {
    pub content: DisplayContent,
    pub flag_c: bool,
    pub flag_h: bool,
}

impl DisplayFrame {
    pub const BLANK: Self = Self {
        content: DisplayContent::Blank,
        flag_c: false,
        flag_h: false,
    };

    /// All segments and both flags lit.
    pub const LAMP_TEST: Self = Self {
        content: DisplayContent::Number(88),
        flag_c: true,
        flag_h: true,
    };

    pub fn number(value: i32, flag_c: bool, flag_h: bool) -> Self {
        Self {
            content: DisplayContent::Number(value),
            flag_c,
            flag_h,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.content == DisplayContent::Blank
    }

    /// Text the digits carry, left aligned and truncated to the panel width.
    pub fn text(&self) -> String {
        match self.content {
            DisplayContent::Blank => String::new(),
            DisplayContent::Error => "E".to_string(),
            DisplayContent::Number(value) => value.to_string().chars().take(DIGIT_COUNT).collect(),
        }
    }

    /// Per-digit shift register bytes. Bits 7..1 carry segments G..A, bit 0 carries the
    /// C flag on the first digit and the H flag on the second.
    pub fn encode(&self) -> [u8; DIGIT_COUNT] {
        let mut buffer = [0_u8; DIGIT_COUNT];
        if self.is_blank() {
            return buffer;
        }

        for (slot, ch) in buffer.iter_mut().zip(self.text().chars()) {
            *slot = segment_pattern(ch) << 1;
        }
        if self.flag_c {
            buffer[0] |= 0x01;
        }
        if self.flag_h {
            buffer[1] |= 0x01;
        }
        buffer
    }
}

/// Segment bits for a glyph, low seven bits ordered G-F-E-D-C-B-A.
pub fn segment_pattern(ch: char) -> u8 {
    match ch {
        '0' => 0b0111111,
        '1' => 0b0000110,
        '2' => 0b1011011,
        '3' => 0b1001111,
        '4' => 0b1100110,
        '5' => 0b1101101,
        '6' => 0b1111101,
        '7' => 0b0000111,
        '8' => 0b1111111,
        '9' => 0b1101111,
        'E' => 0b1111001,
        '-' => 0b1000000,
        _ => 0,
    }
}
