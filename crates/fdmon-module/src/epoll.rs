//! `epoll` engine: registered-interest event queue.
//!
//! Every descriptor is added to the interest list once, level-triggered.
//! With `exclusive`, registrations carry `EPOLLEXCLUSIVE` so that when
//! several engine instances watch the same descriptor the kernel wakes
//! only one of them per event.

use fdmon_core::config::EngineConfig;
use fdmon_core::engine::EngineKind;
use fdmon_core::error::{FdmonError, Result};

use crate::control::ControlFd;
use crate::latch::ReadyPost;
use crate::sys::{self, Echo};
use crate::worker::{EventLoop, LoopEngine};

use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::Arc;

use tracing::{debug, error, trace};

/// Upper bound on events returned by one `epoll_wait`.
const MAX_EVENTS: usize = 64;

struct EpollLoop {
    epfd: OwnedFd,
    control: Arc<ControlFd>,
    events: Vec<libc::epoll_event>,
    buf: Vec<u8>,
}

impl EpollLoop {
    fn add(&self, fd: RawFd, flags: u32) -> Result<()> {
        let mut event = libc::epoll_event {
            events: flags,
            u64: fd as u64,
        };
        let ret = unsafe {
            libc::epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_ADD, fd, &mut event)
        };
        if ret < 0 {
            return Err(FdmonError::setup_last_os("epoll_ctl failed"));
        }
        Ok(())
    }
}

impl EventLoop for EpollLoop {
    fn run(mut self, ready: ReadyPost) {
        ready.post();

        loop {
            let ret = unsafe {
                libc::epoll_wait(
                    self.epfd.as_raw_fd(),
                    self.events.as_mut_ptr(),
                    self.events.len() as libc::c_int,
                    -1,
                )
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %err, "epoll_wait failed, worker exiting");
                return;
            }

            for i in 0..ret as usize {
                let fd = self.events[i].u64 as RawFd;

                if fd == self.control.fd() {
                    if self.control.consume() {
                        debug!("epoll worker stopping");
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
    let flags = if config.exclusive {
        (libc::EPOLLIN | libc::EPOLLEXCLUSIVE) as u32
    } else {
        libc::EPOLLIN as u32
    };

    let buf = sys::message_buffer(config.msg_size)?;

    let max_events = (fds.len() + 1).min(MAX_EVENTS);
    let mut events = Vec::new();
    events
        .try_reserve_exact(max_events)
        .map_err(|_| FdmonError::OutOfMemory)?;
    events.resize(max_events, libc::epoll_event { events: 0, u64: 0 });

    let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
    if epfd < 0 {
        return Err(FdmonError::setup_last_os("epoll_create1 failed"));
    }
    let epfd = unsafe { OwnedFd::from_raw_fd(epfd) };

    let control = Arc::new(ControlFd::create()?);
    let event_loop = EpollLoop {
        epfd,
        control: control.clone(),
        events,
        buf,
    };

    for &fd in fds {
        event_loop.add(fd, flags)?;
    }
    event_loop.add(control.fd(), flags)?;

    LoopEngine::launch(EngineKind::Epoll, control, event_loop)
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
            kind: EngineKind::Epoll,
            num_fds,
            msg_size: 1,
            exclusive,
        }
    }

    #[test]
    #[serial]
    fn test_create_destroy_no_leak() {
        for exclusive in [false, true] {
            for num_fds in [1, 8, 64] {
                let fabric = ChannelFabric::new(num_fds).unwrap();
                let before = open_fds();

                let mut engine = create(&config(num_fds, exclusive), &fabric.engine_fds()).unwrap();
                engine.shutdown();

                assert_eq!(engine.state(), EngineState::Destroyed);
                assert_eq!(open_fds(), before);
            }
        }
    }

    #[test]
    #[serial]
    fn test_registration_failure_unwinds() {
        let fabric = ChannelFabric::new(1).unwrap();
        let before = open_fds();

        // A closed descriptor number cannot be registered.
        let bogus = [fabric.engine_fds()[0], -1];
        let err = create(&config(2, false), &bogus).unwrap_err();

        assert!(matches!(err, FdmonError::BackendSetup { what: "epoll_ctl failed", .. }));
        assert_eq!(open_fds(), before);
    }

    #[test]
    #[serial]
    fn test_two_exclusive_instances_share_fds() {
        let fabric = ChannelFabric::new(4).unwrap();
        let a = create(&config(4, true), &fabric.engine_fds()).unwrap();
        let b = create(&config(4, true), &fabric.engine_fds()).unwrap();

        for round in 0..200u32 {
            let fd = fabric.client_fds()[(round % 4) as usize];
            let byte = [round as u8];
            assert_eq!(sys::write_fd(fd, &byte).unwrap(), 1);
            let mut back = [0u8; 1];
            assert_eq!(sys::read_fd(fd, &mut back).unwrap(), 1);
            assert_eq!(back, byte);
        }

        drop(a);
        drop(b);
    }
}
