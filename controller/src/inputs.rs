use std::time::Duration;

use anyhow::Context;
use esp_idf_hal::gpio::{AnyIOPin, Input, PinDriver, Pull};
use esp_idf_svc::timer::{EspTaskTimerService, EspTimer};
use log::{debug, info, warn};

use towelrack_common::{
    input::{ButtonGestures, GestureTiming, QuadratureDecoder},
    HardwareConfig, InputEvent,
};

use crate::{channel::InputChannel, esp::monotonic_ms};

type InPin = PinDriver<'static, AnyIOPin, Input>;

fn input(pin: i32, pull: Pull) -> anyhow::Result<InPin> {
    let mut driver = unsafe { PinDriver::input(AnyIOPin::new(pin)) }
        .with_context(|| format!("failed to claim GPIO{pin}"))?;
    driver.set_pull(pull)?;
    Ok(driver)
}

struct Pad {
    pin: InPin,
    gestures: ButtonGestures,
    click: InputEvent,
}

/// Samples the knob and the touch pads from a periodic timer and feeds decoded events
/// into the input queue.
pub struct InputPoller {
    knob_a: InPin,
    knob_b: InPin,
    knob_button: InPin,
    decoder: QuadratureDecoder,
    knob_gestures: ButtonGestures,
    pads: [Pad; 2],
    period: Duration,
}

impl InputPoller {
    pub fn new(hardware: &HardwareConfig) -> anyhow::Result<Self> {
        let knob_a = input(hardware.knob_a_pin, Pull::Up)?;
        let knob_b = input(hardware.knob_b_pin, Pull::Up)?;
        let decoder = QuadratureDecoder::new(knob_a.is_high(), knob_b.is_high());
        let timing = GestureTiming::default();

        Ok(Self {
            knob_a,
            knob_b,
            knob_button: input(hardware.knob_button_pin, Pull::Up)?,
            decoder,
            knob_gestures: ButtonGestures::new(timing),
            pads: [
                Pad {
                    pin: input(hardware.touch_left_pin, Pull::Down)?,
                    gestures: ButtonGestures::new(timing),
                    click: InputEvent::TouchLeftClick,
                },
                Pad {
                    pin: input(hardware.touch_right_pin, Pull::Down)?,
                    gestures: ButtonGestures::new(timing),
                    click: InputEvent::TouchRightClick,
                },
            ],
            period: Duration::from_millis(hardware.input_poll_ms),
        })
    }

    /// Polling stops when the returned timer is dropped.
    pub fn start(mut self, queue: InputChannel) -> anyhow::Result<EspTimer<'static>> {
        let period = self.period;
        let service = EspTaskTimerService::new().context("failed to create timer service")?;
        let timer = service
            .timer(move || self.poll(&queue))
            .context("failed to create input poll timer")?;
        timer
            .every(period)
            .context("failed to start input poll timer")?;
        info!("polling inputs every {}ms", period.as_millis());
        Ok(timer)
    }

    fn poll(&mut self, queue: &InputChannel) {
        let now = monotonic_ms();

        if let Some(event) = self
            .decoder
            .update(self.knob_a.is_high(), self.knob_b.is_high())
        {
            submit(queue, event);
        }

        // Knob switch pulls to ground when pressed.
        if let Some(gesture) = self.knob_gestures.update(self.knob_button.is_low(), now) {
            match gesture.knob_event() {
                Some(event) => submit(queue, event),
                None => debug!("ignoring knob {gesture:?}"),
            }
        }

        for pad in &mut self.pads {
            if pad.gestures.update(pad.pin.is_high(), now).is_some() {
                submit(queue, pad.click);
            }
        }
    }
}

fn submit(queue: &InputChannel, event: InputEvent) {
    if let Err(err) = queue.send(event) {
        warn!("{err}");
    }
}
