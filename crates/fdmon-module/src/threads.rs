//! `threads` engine: one blocking reader thread per descriptor.
//!
//! The descriptors are switched to blocking mode for the lifetime of the
//! engine, and each thread sits in `read(2)` on its own descriptor. There
//! is no readiness API involved and no control eventfd.
//!
//! Threads post ready and then wait on a start gate. The gate opens once
//! every thread has posted; a construction that fails before that opens
//! it with `Abort`, and the threads exit without ever reading.
//!
//! Shutdown of a running engine is cooperative: the stop flag is raised
//! and every descriptor gets `shutdown(SHUT_RD)`, which makes blocked and
//! future reads return 0. Threads exit on that and are joined; the
//! descriptors are then put back into non-blocking mode.
//!
//! The read side stays shut down afterwards, for every engine instance
//! sharing the descriptor. Destroying one running threads engine
//! therefore ends service on its channels for good.

use fdmon_core::config::EngineConfig;
use fdmon_core::engine::{Engine, EngineKind, EngineState};
use fdmon_core::error::{FdmonError, Result};

use crate::latch::{ready_latch, ReadyPost};
use crate::sys;
use crate::worker::spawn_worker;

use parking_lot::{Condvar, Mutex};

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, error, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Start {
    Pending,
    Serve,
    Abort,
}

/// Holds posted threads back until construction commits or unwinds.
#[derive(Debug)]
struct StartGate {
    start: Mutex<Start>,
    cond: Condvar,
}

impl StartGate {
    fn new() -> Self {
        Self {
            start: Mutex::new(Start::Pending),
            cond: Condvar::new(),
        }
    }

    fn open(&self, start: Start) {
        *self.start.lock() = start;
        self.cond.notify_all();
    }

    fn wait(&self) -> Start {
        let mut start = self.start.lock();
        while *start == Start::Pending {
            self.cond.wait(&mut start);
        }
        *start
    }

    fn is_serving(&self) -> bool {
        *self.start.lock() == Start::Serve
    }
}

#[derive(Debug)]
struct Worker {
    fd: RawFd,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug)]
pub struct ThreadsEngine {
    workers: Vec<Worker>,
    stop: Arc<AtomicBool>,
    gate: Arc<StartGate>,
    state: EngineState,
}

/// Body of one per-descriptor thread.
fn serve(
    fd: RawFd,
    mut buf: Vec<u8>,
    stop: Arc<AtomicBool>,
    gate: Arc<StartGate>,
    ready: ReadyPost,
) {
    ready.post();
    if gate.wait() == Start::Abort {
        return;
    }

    while !stop.load(Ordering::Acquire) {
        match sys::read_fd(fd, &mut buf) {
            Ok(0) => break,
            Ok(n) if n == buf.len() => {
                if let Err(err) = sys::write_fd(fd, &buf) {
                    trace!(fd, error = %err, "echo write failed");
                }
            }
            Ok(n) => trace!(fd, got = n, "short read"),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                if !stop.load(Ordering::Acquire) {
                    error!(fd, error = %err, "read failed, thread exiting");
                }
                break;
            }
        }
    }
    debug!(fd, "threads worker stopping");
}

impl ThreadsEngine {
    pub fn create(config: &EngineConfig, fds: &[RawFd]) -> Result<Self> {
        let mut workers = Vec::new();
        workers
            .try_reserve_exact(fds.len())
            .map_err(|_| FdmonError::OutOfMemory)?;

        let mut engine = Self {
            workers,
            stop: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(StartGate::new()),
            state: EngineState::Registering,
        };

        // Errors past this point drop `engine`, which aborts whatever
        // has been started so far without touching the descriptors.
        let (latch, post) = ready_latch();
        for (i, &fd) in fds.iter().enumerate() {
            let buf = sys::message_buffer(config.msg_size)?;

            sys::set_nonblocking(fd, false).map_err(|source| FdmonError::BackendSetup {
                what: "failed to make descriptor blocking",
                source,
            })?;
            engine.workers.push(Worker { fd, handle: None });

            let stop = engine.stop.clone();
            let gate = engine.gate.clone();
            let post = post.clone();
            let handle = spawn_worker(format!("fdmon-threads-{i}"), move || {
                serve(fd, buf, stop, gate, post)
            })?;
            if let Some(worker) = engine.workers.last_mut() {
                worker.handle = Some(handle);
            }
        }
        drop(post);

        latch.wait(fds.len())?;
        engine.state = EngineState::Ready;
        engine.gate.open(Start::Serve);

        debug!(threads = fds.len(), "threads engine ready");
        engine.state = EngineState::Running;
        Ok(engine)
    }
}

impl Engine for ThreadsEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Threads
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn live_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.handle.is_some()).count()
    }

    fn shutdown(&mut self) {
        if self.state == EngineState::Destroyed {
            return;
        }

        self.state = EngineState::StopRequested;
        self.stop.store(true, Ordering::Release);
        if self.gate.is_serving() {
            for worker in &self.workers {
                if worker.handle.is_none() {
                    continue;
                }
                if unsafe { libc::shutdown(worker.fd, libc::SHUT_RD) } < 0 {
                    let err = io::Error::last_os_error();
                    warn!(fd = worker.fd, error = %err, "shutdown(SHUT_RD) failed");
                }
            }
        } else {
            self.gate.open(Start::Abort);
        }

        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                if handle.join().is_err() {
                    warn!(fd = worker.fd, "threads worker panicked");
                }
            }
        }
        self.state = EngineState::Stopped;

        for worker in &self.workers {
            if let Err(err) = sys::set_nonblocking(worker.fd, true) {
                warn!(fd = worker.fd, error = %err, "failed to restore O_NONBLOCK");
            }
        }
        self.workers.clear();
        self.state = EngineState::Destroyed;
        debug!("threads engine destroyed");
    }
}

impl Drop for ThreadsEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
