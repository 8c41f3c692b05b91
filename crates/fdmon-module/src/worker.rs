//! `LoopEngine`: the shared shell of every single-worker backend.
//!
//! select, poll, epoll and io_uring differ only in the loop their worker
//! runs. Everything around it is the same and lives here:
//!
//! 1. spawn the worker thread, handing it the backend's `EventLoop`
//! 2. wait for the worker's ready post
//! 3. on `shutdown()`, signal the control descriptor and join
//!
//! The `EventLoop` owns the backend's registration state (epoll fd,
//! ring, pollfd array) and message buffer, so those are released by the
//! worker as it returns, strictly before `join()` completes.

use fdmon_core::engine::{Engine, EngineKind, EngineState};
use fdmon_core::error::{FdmonError, Result};

use crate::control::ControlFd;
use crate::latch::{ready_latch, ReadyPost};

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

/// The steady-state loop of one backend.
pub trait EventLoop: Send + 'static {
    /// Post `ready`, then service descriptors until the control
    /// descriptor fires.
    fn run(self, ready: ReadyPost);
}

/// Spawn a named worker thread.
pub fn spawn_worker<F>(name: String, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|source| FdmonError::Spawn { name, source })
}

#[derive(Debug)]
pub struct LoopEngine {
    kind: EngineKind,
    control: Option<Arc<ControlFd>>,
    worker: Option<JoinHandle<()>>,
    state: EngineState,
}

impl LoopEngine {
    /// Start `event_loop` on its own thread and wait until it is ready.
    ///
    /// On any failure the partially started engine is dropped, which
    /// signals and joins the worker if it got that far.
    pub fn launch<L: EventLoop>(
        kind: EngineKind,
        control: Arc<ControlFd>,
        event_loop: L,
    ) -> Result<Self> {
        let (latch, post) = ready_latch();
        let name = format!("fdmon-{}-0", kind.name());
        let worker = spawn_worker(name, move || event_loop.run(post))?;

        let mut engine = Self {
            kind,
            control: Some(control),
            worker: Some(worker),
            state: EngineState::Registering,
        };
        latch.wait(1)?;
        engine.state = EngineState::Ready;

        debug!(engine = kind.name(), "worker ready");
        engine.state = EngineState::Running;
        Ok(engine)
    }
}

impl Engine for LoopEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn live_workers(&self) -> usize {
        self.worker.is_some() as usize
    }

    fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.state = EngineState::StopRequested;
        if let Some(control) = &self.control {
            if let Err(e) = control.signal() {
                warn!(engine = self.kind.name(), error = %e, "control signal failed");
            }
        }

        if worker.join().is_err() {
            warn!(engine = self.kind.name(), "worker panicked");
        }
        self.state = EngineState::Stopped;

        self.control = None;
        self.state = EngineState::Destroyed;
        debug!(engine = self.kind.name(), "engine destroyed");
    }
}

impl Drop for LoopEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
