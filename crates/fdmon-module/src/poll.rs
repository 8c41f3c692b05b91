//! `poll` engine: array-based polling.
//!
//! The `pollfd` array is built once. Only `revents` changes between
//! passes, so there is nothing to re-arm.

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

struct PollLoop {
    control: Arc<ControlFd>,
    /// Control eventfd at index 0.
    pollfds: Vec<libc::pollfd>,
    buf: Vec<u8>,
}

impl EventLoop for PollLoop {
    fn run(mut self, ready: ReadyPost) {
        ready.post();

        loop {
            let ret = unsafe {
                libc::poll(
                    self.pollfds.as_mut_ptr(),
                    self.pollfds.len() as libc::nfds_t,
                    -1,
                )
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %err, "poll failed, worker exiting");
                return;
            }

            let mut remaining = ret;
            for i in 0..self.pollfds.len() {
                if remaining == 0 {
                    break;
                }
                let pfd = self.pollfds[i];
                if pfd.revents & libc::POLLIN == 0 {
                    continue;
                }
                remaining -= 1;

                if i == 0 {
                    if self.control.consume() {
                        debug!("poll worker stopping");
                        return;
                    }
                    continue;
                }

                if sys::echo(pfd.fd, &mut self.buf) == Echo::Spurious {
                    trace!(fd = pfd.fd, "spurious wakeup");
                }
            }
        }
    }
}

pub fn create(config: &EngineConfig, fds: &[RawFd]) -> Result<LoopEngine> {
    let buf = sys::message_buffer(config.msg_size)?;

    let mut pollfds = Vec::new();
    pollfds
        .try_reserve_exact(fds.len() + 1)
        .map_err(|_| FdmonError::OutOfMemory)?;

    let control = Arc::new(ControlFd::create()?);

    pollfds.push(readable(control.fd()));
    pollfds.extend(fds.iter().map(|&fd| readable(fd)));

    let event_loop = PollLoop {
        control: control.clone(),
        pollfds,
        buf,
    };
    LoopEngine::launch(EngineKind::Poll, control, event_loop)
}

fn readable(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::ChannelFabric;
    use crate::testutil::open_fds;
    use fdmon_core::engine::{Engine, EngineState};
    use serial_test::serial;

    fn config(num_fds: usize, msg_size: usize) -> EngineConfig {
        EngineConfig {
            kind: EngineKind::Poll,
            num_fds,
            msg_size,
            exclusive: false,
        }
    }

    #[test]
    #[serial]
    fn test_create_destroy_no_leak() {
        for num_fds in [1, 8, 64] {
            let fabric = ChannelFabric::new(num_fds).unwrap();
            let before = open_fds();

            let mut engine = create(&config(num_fds, 1), &fabric.engine_fds()).unwrap();
            assert_eq!(engine.kind(), EngineKind::Poll);
            engine.shutdown();

            assert_eq!(engine.state(), EngineState::Destroyed);
            assert_eq!(open_fds(), before);
        }
    }

    #[test]
    #[serial]
    fn test_echo_large_message() {
        let fabric = ChannelFabric::new(2).unwrap();
        let _engine = create(&config(2, 4096), &fabric.engine_fds()).unwrap();

        let client = fabric.client_fds()[1];
        let msg: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        assert_eq!(sys::write_fd(client, &msg).unwrap(), 4096);

        let mut back = vec![0u8; 4096];
        assert_eq!(sys::read_fd(client, &mut back).unwrap(), 4096);
        assert_eq!(back, msg);
    }
}
