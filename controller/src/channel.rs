use std::sync::{
    atomic::{AtomicU64, Ordering},
    mpsc::{self, Receiver, SyncSender, TrySendError},
    Arc,
};

use thiserror::Error;

use towelrack_common::InputEvent;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    #[error("input queue full, dropped {}", .0.as_str())]
    Full(InputEvent),
    #[error("input consumer is gone")]
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct Stamped {
    seq: u64,
    event: InputEvent,
}

#[derive(Debug, Default)]
struct Epoch {
    next_seq: AtomicU64,
    flushed_below: AtomicU64,
}

/// Producer side of the bounded input FIFO. Cheap to clone; any holder may reset it.
#[derive(Debug, Clone)]
pub struct InputChannel {
    tx: SyncSender<Stamped>,
    epoch: Arc<Epoch>,
}

/// Single consumer side, owned by the input redirect task.
#[derive(Debug)]
pub struct InputReceiver {
    rx: Receiver<Stamped>,
    epoch: Arc<Epoch>,
}

pub fn input_channel(depth: usize) -> (InputChannel, InputReceiver) {
    let (tx, rx) = mpsc::sync_channel(depth.max(1));
    let epoch = Arc::new(Epoch::default());
    (
        InputChannel {
            tx,
            epoch: epoch.clone(),
        },
        InputReceiver { rx, epoch },
    )
}

impl InputChannel {
    /// Never blocks; drivers call this from their polling context.
    pub fn send(&self, event: InputEvent) -> Result<(), ChannelError> {
        let seq = self.epoch.next_seq.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(Stamped { seq, event }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ChannelError::Full(event)),
            Err(TrySendError::Disconnected(_)) => Err(ChannelError::Closed),
        }
    }

    /// Discards every event sent before this call, whichever thread makes it.
    pub fn reset(&self) {
        let next = self.epoch.next_seq.load(Ordering::SeqCst);
        self.epoch.flushed_below.fetch_max(next, Ordering::SeqCst);
    }
}

impl InputReceiver {
    fn is_live(&self, stamped: &Stamped) -> bool {
        stamped.seq >= self.epoch.flushed_below.load(Ordering::SeqCst)
    }

    /// Blocks until a live event arrives. `None` once every sender is dropped.
    pub fn receive(&self) -> Option<InputEvent> {
        loop {
            let stamped = self.rx.recv().ok()?;
            if self.is_live(&stamped) {
                return Some(stamped.event);
            }
        }
    }
}
