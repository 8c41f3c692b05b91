//! One-shot ready handshake between `create` and its worker threads.
//!
//! Each worker gets a `ReadyPost` and consumes it right before it blocks
//! in its wait primitive. The creating thread waits on the `ReadyLatch`
//! for as many posts as it spawned workers, so no generator I/O can be
//! issued before every worker is listening.
//!
//! A worker that dies before posting drops its `ReadyPost`; once every
//! other poster is gone too, `wait` reports the broken handshake instead
//! of blocking forever.

use fdmon_core::error::{FdmonError, Result};

use std::sync::mpsc;

/// Creator side of the handshake.
pub struct ReadyLatch {
    rx: mpsc::Receiver<()>,
}

/// Worker side of the handshake.
#[derive(Clone)]
pub struct ReadyPost {
    tx: mpsc::Sender<()>,
}

pub fn ready_latch() -> (ReadyLatch, ReadyPost) {
    let (tx, rx) = mpsc::channel();
    (ReadyLatch { rx }, ReadyPost { tx })
}

impl ReadyPost {
    /// Signal readiness. Consumes the post so a worker can signal once.
    pub fn post(self) {
        // The creator may already have given up on us; nothing to do then.
        let _ = self.tx.send(());
    }
}

impl ReadyLatch {
    /// Block until `count` workers have posted.
    ///
    /// The caller must not hold a `ReadyPost` of its own, or a dead worker
    /// turns into a hang instead of an error.
    pub fn wait(&self, count: usize) -> Result<()> {
        for _ in 0..count {
            self.rx
                .recv()
                .map_err(|_| FdmonError::Handshake("worker exited before signalling readiness"))?;
        }
        Ok(())
    }
}
