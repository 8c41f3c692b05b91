//! `ControlFd`: the private per-engine shutdown descriptor.
//!
//! An eventfd registered alongside the data descriptors in the engine's
//! wait primitive. `destroy` writes to it; the worker sees it readable,
//! drains the counter and leaves its loop.
//! Coalescing: multiple `signal()` calls before the worker reads result
//! in a single wakeup (eventfd counter semantics).

use fdmon_core::error::{FdmonError, Result};

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

pub struct ControlFd {
    fd: OwnedFd,
}

impl ControlFd {
    /// Create a new `EFD_NONBLOCK | EFD_CLOEXEC` eventfd.
    ///
    /// The descriptor is closed when the `ControlFd` is dropped.
    pub fn create() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(FdmonError::setup_last_os("Eventfd creation failed"));
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// The raw eventfd, for registering with a wait primitive.
    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Ask the worker to stop. Never blocks.
    pub fn signal(&self) -> io::Result<()> {
        let val: u64 = 1;
        let ret = unsafe {
            libc::write(
                self.fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // EAGAIN means the counter is saturated: a stop is already pending.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Drain the counter. True if a stop request was pending.
    ///
    /// A false return after a readiness event is a spurious wakeup and
    /// the worker keeps going.
    pub fn consume(&self) -> bool {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        ret == std::mem::size_of::<u64>() as isize
    }
}

impl std::fmt::Debug for ControlFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlFd").field("fd", &self.fd()).finish()
    }
}
