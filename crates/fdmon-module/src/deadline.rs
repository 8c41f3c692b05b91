//! `Deadline`: ends a run after a fixed wall-clock duration.
//!
//! A timer thread sleeps on a condvar until the duration elapses or the
//! deadline is disarmed. On expiry it raises the stop token, then sends
//! `SIGALRM` to the thread that armed it, so a generator blocked in
//! `read`/`write` gets `EINTR` and sees the token. The handler does
//! nothing and is installed without `SA_RESTART`.
//!
//! Only the arming thread is signalled; engine workers never see it.

use fdmon_core::error::{FdmonError, Result};
use fdmon_core::stop::StopToken;

use crate::worker::spawn_worker;

use nix::sys::pthread::{pthread_kill, pthread_self};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use parking_lot::{Condvar, Mutex};

use std::io;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

static ALARM_HANDLER: OnceLock<nix::Result<()>> = OnceLock::new();

extern "C" fn on_alarm(_signo: libc::c_int) {}

/// Install the no-op `SIGALRM` handler, once per process.
fn install_alarm_handler() -> Result<()> {
    let installed = ALARM_HANDLER.get_or_init(|| {
        let action = SigAction::new(
            SigHandler::Handler(on_alarm),
            SaFlags::empty(),
            SigSet::empty(),
        );
        unsafe { sigaction(Signal::SIGALRM, &action) }.map(drop)
    });
    (*installed).map_err(|errno| FdmonError::Deadline(io::Error::from(errno)))
}

struct Shared {
    disarmed: Mutex<bool>,
    cond: Condvar,
}

pub struct Deadline {
    shared: Arc<Shared>,
    timer: Option<JoinHandle<()>>,
}

impl Deadline {
    /// Start the timer. The calling thread is the one interrupted on
    /// expiry, and must outlive the `Deadline`.
    pub fn arm(duration: Duration, stop: StopToken) -> Result<Self> {
        install_alarm_handler()?;

        let mut unblock = SigSet::empty();
        unblock.add(Signal::SIGALRM);
        unblock
            .thread_unblock()
            .map_err(|errno| FdmonError::Deadline(io::Error::from(errno)))?;

        let target = pthread_self();
        let shared = Arc::new(Shared {
            disarmed: Mutex::new(false),
            cond: Condvar::new(),
        });
        let expires = Instant::now() + duration;

        let timer_shared = shared.clone();
        let timer = spawn_worker("fdmon-deadline".to_string(), move || {
            let mut disarmed = timer_shared.disarmed.lock();
            while !*disarmed {
                if timer_shared.cond.wait_until(&mut disarmed, expires).timed_out() {
                    break;
                }
            }
            if *disarmed {
                return;
            }

            // Still holding the lock: `disarm` cannot return, so the
            // target thread is alive for the kill.
            stop.stop();
            if let Err(errno) = pthread_kill(target, Signal::SIGALRM) {
                warn!(error = %errno, "failed to interrupt generator thread");
            }
            debug!("deadline expired");
        })?;

        Ok(Self {
            shared,
            timer: Some(timer),
        })
    }

    /// Cancel the timer if it has not fired yet, and wait for its thread.
    pub fn disarm(&mut self) {
        let Some(timer) = self.timer.take() else {
            return;
        };
        *self.shared.disarmed.lock() = true;
        self.shared.cond.notify_all();
        if timer.join().is_err() {
            warn!("deadline timer panicked");
        }
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.disarm();
    }
}
