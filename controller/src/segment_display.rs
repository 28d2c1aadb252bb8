use std::{
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use esp_idf_hal::gpio::{AnyOutputPin, Level, Output, PinDriver};
use esp_idf_svc::timer::{EspTaskTimerService, EspTimer};
use log::info;

use towelrack_common::{
    display::DIGIT_COUNT, ports::Display, DisplayContent, DisplayFrame, HardwareConfig,
};

type OutPin = PinDriver<'static, AnyOutputPin, Output>;

fn output(pin: i32) -> anyhow::Result<OutPin> {
    let mut driver = unsafe { PinDriver::output(AnyOutputPin::new(pin)) }
        .with_context(|| format!("failed to claim GPIO{pin}"))?;
    driver.set_low()?;
    Ok(driver)
}

fn pack(segments: [u8; DIGIT_COUNT]) -> u16 {
    u16::from_be_bytes(segments)
}

/// Two multiplexed digits behind a 74HC595. A periodic timer lights one digit per tick;
/// writers only swap the packed segment bytes.
pub struct SegmentDisplay {
    frame: DisplayFrame,
    segments: Arc<AtomicU16>,
    _timer: EspTimer<'static>,
}

impl SegmentDisplay {
    pub fn new(hardware: &HardwareConfig) -> anyhow::Result<Self> {
        let segments = Arc::new(AtomicU16::new(0));
        let mut scanner = Scanner {
            data: output(hardware.shift_data_pin)?,
            clock: output(hardware.shift_clock_pin)?,
            latch: output(hardware.shift_latch_pin)?,
            selects: [
                output(hardware.digit1_select_pin)?,
                output(hardware.digit2_select_pin)?,
            ],
            next: 0,
            segments: segments.clone(),
        };
        scanner.release_all();

        let service = EspTaskTimerService::new().context("failed to create timer service")?;
        let timer = service
            .timer(move || scanner.tick())
            .context("failed to create display refresh timer")?;
        timer
            .every(Duration::from_micros(hardware.display_refresh_us))
            .context("failed to start display refresh timer")?;

        info!(
            "segment display refreshing every {}us",
            hardware.display_refresh_us
        );
        Ok(Self {
            frame: DisplayFrame::BLANK,
            segments,
            _timer: timer,
        })
    }

    fn publish(&mut self, content: DisplayContent) {
        self.frame.content = content;
        self.segments
            .store(pack(self.frame.encode()), Ordering::Relaxed);
    }
}

impl Display for SegmentDisplay {
    fn write_digits(&mut self, value: i32) {
        self.publish(DisplayContent::Number(value));
    }

    fn write_blank(&mut self) {
        self.publish(DisplayContent::Blank);
    }

    fn write_error(&mut self) {
        self.publish(DisplayContent::Error);
    }

    fn set_flag_c(&mut self, lit: bool) {
        self.frame.flag_c = lit;
    }

    fn set_flag_h(&mut self, lit: bool) {
        self.frame.flag_h = lit;
    }
}

struct Scanner {
    data: OutPin,
    clock: OutPin,
    latch: OutPin,
    // Active low.
    selects: [OutPin; DIGIT_COUNT],
    next: usize,
    segments: Arc<AtomicU16>,
}

impl Scanner {
    fn release_all(&mut self) {
        for select in &mut self.selects {
            let _ = select.set_high();
        }
    }

    fn tick(&mut self) {
        let digits = self.segments.load(Ordering::Relaxed).to_be_bytes();
        let digit = self.next;
        self.next = (self.next + 1) % DIGIT_COUNT;

        self.release_all();
        self.shift_out(digits[digit]);
        let _ = self.selects[digit].set_low();
    }

    fn shift_out(&mut self, byte: u8) {
        for bit in (0..8).rev() {
            let _ = self.data.set_level(Level::from((byte >> bit) & 1 == 1));
            let _ = self.clock.set_high();
            let _ = self.clock.set_low();
        }
        let _ = self.latch.set_high();
        let _ = self.latch.set_low();
    }
}
