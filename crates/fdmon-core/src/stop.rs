//! Stop token for cooperative run termination
//!
//! The run deadline flips the token once; the load generator polls it
//! between every step of its loop and after every interrupted syscall.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared one-way stop flag.
///
/// Cloning yields another handle to the same flag. Once stopped, a token
/// never becomes un-stopped.
#[derive(Clone, Default)]
pub struct StopToken {
    stopped: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a stop was requested
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Request a stop. Safe to call from any thread, any number of times.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for StopToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopToken")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
