//! `select` engine: synchronous scanning over an fd bitset.
//!
//! The bitset is rebuilt from the descriptor list on every pass, since
//! `select(2)` overwrites it with the ready subset. Descriptors must be
//! below `FD_SETSIZE`; that includes the control eventfd, which is only
//! known once it has been created.

use fdmon_core::config::EngineConfig;
use fdmon_core::engine::EngineKind;
use fdmon_core::error::{FdmonError, Result};

use crate::control::ControlFd;
use crate::latch::ReadyPost;
use crate::sys::{self, Echo};
use crate::worker::{EventLoop, LoopEngine};

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use tracing::{debug, error, trace};

/// Highest descriptor number + 1 that fits in an `fd_set`.
pub const FD_LIMIT: RawFd = libc::FD_SETSIZE as RawFd;

/// Can `select(2)` monitor `fd`?
pub fn check_fd_limit(fd: RawFd) -> Result<()> {
    if fd >= FD_LIMIT {
        return Err(FdmonError::CapacityExceeded {
            engine: EngineKind::Select.name(),
            fd,
            limit: FD_LIMIT,
        });
    }
    Ok(())
}

struct SelectLoop {
    control: Arc<ControlFd>,
    /// Control eventfd at index 0, data descriptors after it.
    fds: Vec<RawFd>,
    nfds: libc::c_int,
    buf: Vec<u8>,
}

impl EventLoop for SelectLoop {
    fn run(mut self, ready: ReadyPost) {
        ready.post();

        loop {
            let mut readfds: libc::fd_set = unsafe { std::mem::zeroed() };
            unsafe {
                libc::FD_ZERO(&mut readfds);
                for &fd in &self.fds {
                    libc::FD_SET(fd, &mut readfds);
                }
            }

            let ret = unsafe {
                libc::select(
                    self.nfds,
                    &mut readfds,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                )
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %err, "select failed, worker exiting");
                return;
            }

            let mut remaining = ret;
            for (i, &fd) in self.fds.iter().enumerate() {
                if remaining == 0 {
                    break;
                }
                if !unsafe { libc::FD_ISSET(fd, &readfds) } {
                    continue;
                }
                remaining -= 1;

                if i == 0 {
                    if self.control.consume() {
                        debug!("select worker stopping");
                        return;
                    }
                    continue;
                }

                if sys::echo(fd, &mut self.buf) == Echo::Spurious {
                    trace!(fd, "spurious wakeup");
                }
            }
        }
    }
}

pub fn create(config: &EngineConfig, fds: &[RawFd]) -> Result<LoopEngine> {
    for &fd in fds {
        check_fd_limit(fd)?;
    }

    let buf = sys::message_buffer(config.msg_size)?;

    let mut watched = Vec::new();
    watched
        .try_reserve_exact(fds.len() + 1)
        .map_err(|_| FdmonError::OutOfMemory)?;

    let control = Arc::new(ControlFd::create()?);
    check_fd_limit(control.fd())?;

    watched.push(control.fd());
    watched.extend_from_slice(fds);
    let nfds = watched.iter().copied().max().unwrap_or(0) + 1;

    let event_loop = SelectLoop {
        control: control.clone(),
        fds: watched,
        nfds,
        buf,
    };
    LoopEngine::launch(EngineKind::Select, control, event_loop)
}
