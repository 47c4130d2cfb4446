//! One-shot cancellation broadcast.
//!
//! Built on channel disconnection: the [`Latch`] holds the only sender of a
//! zero-capacity channel whose payload type is uninhabited, so the paired
//! [`Gate`]s can never receive a value and unblock exactly once, when the
//! latch trips. Gates clone cheaply and compose with `select!` at every
//! stage suspension point.

use std::convert::Infallible;

use crossbeam_channel::{bounded, never, Receiver, TryRecvError};

/// Trip side of the broadcast. Tripping (or dropping) releases every gate.
pub struct Latch {
    _tx: crossbeam_channel::Sender<Infallible>,
}

impl Latch {
    pub fn new() -> (Latch, Gate) {
        let (tx, rx) = bounded(0);
        (Latch { _tx: tx }, Gate { rx })
    }

    /// Releases all gates. Equivalent to dropping the latch.
    pub fn trip(self) {}
}

/// Observer side of the broadcast.
#[derive(Clone)]
pub struct Gate {
    rx: Receiver<Infallible>,
}

impl Gate {
    /// A gate that never trips, for runs without external cancellation.
    pub fn open() -> Gate {
        Gate { rx: never() }
    }

    /// The receiver to pair with other operations in a `select!`.
    pub fn channel(&self) -> &Receiver<Infallible> {
        &self.rx
    }

    pub fn is_tripped(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Blocks until the latch trips.
    pub fn wait(&self) {
        let _ = self.rx.recv();
    }
}
