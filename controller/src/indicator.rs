use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    thread,
    time::Duration,
};

use anyhow::Context;
use log::warn;

use towelrack_common::{indicator::PatternCursor, ports::Indicator, IndicatorMode, Rgb};

/// Whole-strip color output.
pub trait PixelStrip: Send {
    fn fill(&mut self, color: Rgb) -> anyhow::Result<()>;
}

/// Plays named patterns on a strip from its own thread; `set_mode` never blocks.
pub struct PatternIndicator {
    tx: Sender<IndicatorMode>,
}

impl PatternIndicator {
    pub fn spawn<S>(strip: S) -> anyhow::Result<Self>
    where
        S: PixelStrip + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("indicator".into())
            .stack_size(4 * 1024)
            .spawn(move || play(strip, rx))
            .context("failed to spawn indicator task")?;
        Ok(Self { tx })
    }
}

impl Indicator for PatternIndicator {
    fn set_mode(&mut self, mode: IndicatorMode) {
        if self.tx.send(mode).is_err() {
            warn!("indicator task is gone, dropping {}", mode.as_str());
        }
    }
}

fn play<S: PixelStrip>(mut strip: S, modes: Receiver<IndicatorMode>) {
    let mut cursor: Option<PatternCursor> = None;
    let mut wait: Option<Duration> = None;

    loop {
        let next_mode = match wait {
            Some(hold) => match modes.recv_timeout(hold) {
                Ok(mode) => Some(mode),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match modes.recv() {
                Ok(mode) => Some(mode),
                Err(_) => return,
            },
        };

        if let Some(mode) = next_mode {
            cursor = Some(mode.pattern().cursor());
        }

        wait = match cursor.as_mut().and_then(PatternCursor::next_step) {
            Some(step) => {
                if let Err(err) = strip.fill(step.color) {
                    warn!("failed to write LED strip: {err:#}");
                }
                Some(Duration::from_millis(step.hold_ms))
            }
            None => None,
        };
    }
}
