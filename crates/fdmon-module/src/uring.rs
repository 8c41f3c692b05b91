//! `io_uring` engine: completion-queue based readiness.
//!
//! Each descriptor gets a one-shot `IORING_OP_POLL_ADD` whose
//! `user_data` is the descriptor itself. When its completion is reaped
//! the worker services the descriptor and arms a fresh poll. A poll
//! that completes with an error is not re-armed.
//!
//! Submission batching: re-arms accumulate in the SQ and are flushed by
//! the next `submit_and_wait`, so one syscall both submits and waits.

use fdmon_core::config::EngineConfig;
use fdmon_core::engine::EngineKind;
use fdmon_core::error::{FdmonError, Result};

use crate::control::ControlFd;
use crate::latch::ReadyPost;
use crate::sys::{self, Echo};
use crate::worker::{EventLoop, LoopEngine};

use io_uring::{opcode, types, IoUring};

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use tracing::{debug, error, trace};

const MIN_ENTRIES: u32 = 64;
const MAX_ENTRIES: u32 = 4096;

/// Can this process set up an io_uring at all?
///
/// False under seccomp filters that block `io_uring_setup`, on kernels
/// built without it, or with `io_uring_disabled` set.
pub fn is_supported() -> bool {
    IoUring::new(2).is_ok()
}

/// SQ size for `num_fds` descriptors plus the control eventfd.
fn ring_entries(num_fds: usize) -> u32 {
    let wanted = u32::try_from(num_fds + 1).unwrap_or(MAX_ENTRIES);
    wanted.min(MAX_ENTRIES).next_power_of_two().max(MIN_ENTRIES)
}

struct UringLoop {
    ring: IoUring,
    control: Arc<ControlFd>,
    poll_mask: u32,
    buf: Vec<u8>,
    /// (descriptor, result) pairs reaped from the CQ in one pass.
    reaped: Vec<(RawFd, i32)>,
}

impl UringLoop {
    /// Queue a one-shot poll on `fd`. Flushes the SQ if it is full.
    fn arm(&mut self, fd: RawFd) -> io::Result<()> {
        let sqe = opcode::PollAdd::new(types::Fd(fd), self.poll_mask)
            .build()
            .user_data(fd as u64);

        if unsafe { self.ring.submission().push(&sqe) }.is_ok() {
            return Ok(());
        }
        self.ring.submit()?;
        unsafe { self.ring.submission().push(&sqe) }
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "submission queue full"))
    }
}

impl EventLoop for UringLoop {
    fn run(mut self, ready: ReadyPost) {
        ready.post();

        loop {
            if let Err(err) = self.ring.submit_and_wait(1) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %err, "io_uring_enter failed, worker exiting");
                return;
            }

            self.reaped.clear();
            self.reaped.extend(
                self.ring
                    .completion()
                    .map(|cqe| (cqe.user_data() as RawFd, cqe.result())),
            );

            for i in 0..self.reaped.len() {
                let (fd, res) = self.reaped[i];

                if fd == self.control.fd() {
                    if res < 0 {
                        error!(errno = -res, "control poll failed, worker exiting");
                        return;
                    }
                    if self.control.consume() {
                        debug!("io_uring worker stopping");
                        return;
                    }
                } else if res < 0 {
                    error!(fd, errno = -res, "poll failed, descriptor dropped");
                    continue;
                } else if sys::echo(fd, &mut self.buf) == Echo::Spurious {
                    trace!(fd, "spurious wakeup");
                }

                if let Err(err) = self.arm(fd) {
                    error!(fd, error = %err, "re-arm failed, worker exiting");
                    return;
                }
            }
        }
    }
}

pub fn create(config: &EngineConfig, fds: &[RawFd]) -> Result<LoopEngine> {
    let mut poll_mask = libc::POLLIN as u32;
    if config.exclusive {
        poll_mask |= libc::EPOLLEXCLUSIVE as u32;
    }

    let buf = sys::message_buffer(config.msg_size)?;

    let mut reaped = Vec::new();
    reaped
        .try_reserve(fds.len() + 1)
        .map_err(|_| FdmonError::OutOfMemory)?;

    let ring = IoUring::builder()
        .build(ring_entries(fds.len()))
        .map_err(|source| FdmonError::BackendSetup {
            what: "io_uring setup failed (do you need to increase ulimit -l?)",
            source,
        })?;

    let control = Arc::new(ControlFd::create()?);
    let mut event_loop = UringLoop {
        ring,
        control: control.clone(),
        poll_mask,
        buf,
        reaped,
    };

    let arm_failed = |source| FdmonError::BackendSetup {
        what: "io_uring poll submission failed",
        source,
    };
    for &fd in fds {
        event_loop.arm(fd).map_err(arm_failed)?;
    }
    event_loop.arm(control.fd()).map_err(arm_failed)?;
    event_loop.ring.submit().map_err(arm_failed)?;

    LoopEngine::launch(EngineKind::IoUring, control, event_loop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::ChannelFabric;
    use crate::testutil::open_fds;
    use fdmon_core::engine::{Engine, EngineState};
    use serial_test::serial;

    fn config(num_fds: usize, exclusive: bool) -> EngineConfig {
        EngineConfig {
            kind: EngineKind::IoUring,
            num_fds,
            msg_size: 16,
            exclusive,
        }
    }

    #[test]
    fn test_ring_entries() {
        assert_eq!(ring_entries(1), 64);
        assert_eq!(ring_entries(63), 64);
        assert_eq!(ring_entries(64), 128);
        assert_eq!(ring_entries(1000), 1024);
        assert_eq!(ring_entries(100_000), 4096);
    }

    #[test]
    #[serial]
    fn test_create_destroy_no_leak() {
        if !is_supported() {
            return;
        }
        for num_fds in [1, 8, 64] {
            let fabric = ChannelFabric::new(num_fds).unwrap();
            let before = open_fds();

            let mut engine = create(&config(num_fds, false), &fabric.engine_fds()).unwrap();
            engine.shutdown();

            assert_eq!(engine.state(), EngineState::Destroyed);
            assert_eq!(open_fds(), before);
        }
    }

    #[test]
    #[serial]
    fn test_rearms_after_each_message() {
        if !is_supported() {
            return;
        }
        let fabric = ChannelFabric::new(3).unwrap();
        let _engine = create(&config(3, false), &fabric.engine_fds()).unwrap();

        // The same descriptor several times in a row needs a fresh poll each time.
        let fd = fabric.client_fds()[2];
        for round in 0..50u8 {
            let msg = [round; 16];
            assert_eq!(sys::write_fd(fd, &msg).unwrap(), 16);
            let mut back = [0u8; 16];
            assert_eq!(sys::read_fd(fd, &mut back).unwrap(), 16);
            assert_eq!(back, msg);
        }
    }

    #[test]
    #[serial]
    fn test_wide_descriptor_set() {
        if !is_supported() {
            return;
        }
        let fabric = ChannelFabric::new(200).unwrap();
        let _engine = create(&config(200, false), &fabric.engine_fds()).unwrap();

        let fd = fabric.client_fds()[199];
        assert_eq!(sys::write_fd(fd, &[9u8; 16]).unwrap(), 16);
        let mut back = [0u8; 16];
        assert_eq!(sys::read_fd(fd, &mut back).unwrap(), 16);
    }
}
