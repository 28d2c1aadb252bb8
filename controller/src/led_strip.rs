use anyhow::Context;
use esp_idf_hal::{
    gpio::OutputPin,
    peripheral::Peripheral,
    rmt::{
        config::TransmitConfig, PinState, Pulse, PulseTicks, RmtChannel, TxRmtDriver,
        VariableLengthSignal,
    },
};
use log::info;

use towelrack_common::Rgb;

use crate::indicator::PixelStrip;

// 80 MHz APB / 2 = 25 ns per tick.
const RMT_CLOCK_DIVIDER: u8 = 2;
const T0H_TICKS: u16 = 12;
const T0L_TICKS: u16 = 36;
const T1H_TICKS: u16 = 24;
const T1L_TICKS: u16 = 24;
const BITS_PER_LED: usize = 24;

/// SK6812 chain driven over one RMT channel. Every LED shows the same color.
pub struct LedStrip {
    tx: TxRmtDriver<'static>,
    leds: usize,
    brightness_pct: u8,
    zero: [Pulse; 2],
    one: [Pulse; 2],
}

impl LedStrip {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
        leds: usize,
        brightness_pct: u8,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let config = TransmitConfig::new()
            .clock_divider(RMT_CLOCK_DIVIDER)
            .idle(Some(PinState::Low));
        let tx = TxRmtDriver::new(channel, pin, &config).context("failed to init RMT LED driver")?;

        let zero = [
            Pulse::new(PinState::High, PulseTicks::new(T0H_TICKS)?),
            Pulse::new(PinState::Low, PulseTicks::new(T0L_TICKS)?),
        ];
        let one = [
            Pulse::new(PinState::High, PulseTicks::new(T1H_TICKS)?),
            Pulse::new(PinState::Low, PulseTicks::new(T1L_TICKS)?),
        ];

        info!("LED strip ready: {leds} x SK6812 at {brightness_pct}% brightness");
        Ok(Self {
            tx,
            leds,
            brightness_pct,
            zero,
            one,
        })
    }
}

impl PixelStrip for LedStrip {
    fn fill(&mut self, color: Rgb) -> anyhow::Result<()> {
        let color = color.scaled(self.brightness_pct);
        let mut signal = VariableLengthSignal::with_capacity(self.leds * BITS_PER_LED * 2);

        // SK6812 latches green, red, blue, most significant bit first.
        for _ in 0..self.leds {
            for byte in [color.g, color.r, color.b] {
                for bit in (0..8).rev() {
                    let symbol = if (byte >> bit) & 1 == 1 {
                        &self.one
                    } else {
                        &self.zero
                    };
                    signal
                        .push(symbol.iter())
                        .context("failed to encode LED frame")?;
                }
            }
        }

        self.tx
            .start_blocking(&signal)
            .context("failed to transmit LED frame over RMT")?;
        Ok(())
    }
}
