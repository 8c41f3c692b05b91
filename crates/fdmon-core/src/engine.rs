//! Engine abstraction.
//!
//! An `Engine` monitors a set of non-blocking descriptors for readability
//! and echoes every full message it reads back to the sender. It owns one
//! or more background worker threads and a private control descriptor
//! used only to deliver the shutdown request.
//!
//! # Implementors (in `fdmon-module`)
//!
//! | Kind      | Wait primitive                  | Exclusive wakeup |
//! |-----------|---------------------------------|------------------|
//! | `select`  | `select(2)` over a rebuilt bitset | no             |
//! | `poll`    | `poll(2)` over a persistent array | no             |
//! | `epoll`   | `epoll_wait(2)`                 | yes              |
//! | `io_uring`| one-shot `IORING_OP_POLL_ADD`   | yes              |
//! | `threads` | blocking `read(2)`, one thread per fd | no         |

use std::fmt;
use std::str::FromStr;

use crate::error::FdmonError;

/// Backend selector and capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    Select,
    Poll,
    Epoll,
    IoUring,
    Threads,
}

impl EngineKind {
    /// Every backend, in the order the CLI lists them.
    pub const ALL: [EngineKind; 5] = [
        EngineKind::Epoll,
        EngineKind::IoUring,
        EngineKind::Poll,
        EngineKind::Select,
        EngineKind::Threads,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            EngineKind::Select => "select",
            EngineKind::Poll => "poll",
            EngineKind::Epoll => "epoll",
            EngineKind::IoUring => "io_uring",
            EngineKind::Threads => "threads",
        }
    }

    /// Can this backend deliver a readiness event to only one of several
    /// instances watching the same descriptor?
    pub const fn supports_exclusive(self) -> bool {
        matches!(self, EngineKind::Epoll | EngineKind::IoUring)
    }

    /// Worker threads one instance of this backend runs for `num_fds`
    /// descriptors.
    pub const fn workers_per_instance(self, num_fds: usize) -> usize {
        match self {
            EngineKind::Threads => num_fds,
            _ => 1,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EngineKind {
    type Err = FdmonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EngineKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| FdmonError::UnknownEngine(s.to_string()))
    }
}

/// Lifecycle of one engine instance.
///
/// ```text
/// Uninitialized → Registering → Ready → Running → StopRequested → Stopped → Destroyed
/// ```
///
/// Construction walks the first three states before the handle is
/// returned, so callers only ever observe `Running` and later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EngineState {
    Uninitialized,
    Registering,
    Ready,
    Running,
    StopRequested,
    Stopped,
    Destroyed,
}

/// A running notification engine.
///
/// **Contract:**
/// - When the handle exists, every worker has already posted readiness.
/// - `shutdown()` blocks until every worker thread has been joined and
///   all backend resources are released. It is idempotent.
/// - Dropping the handle calls `shutdown()`.
pub trait Engine: Send + fmt::Debug {
    /// Which backend this instance runs.
    fn kind(&self) -> EngineKind;

    /// Current lifecycle state.
    fn state(&self) -> EngineState;

    /// Worker threads not yet joined.
    fn live_workers(&self) -> usize;

    /// Stop every worker, join it, then release backend resources.
    fn shutdown(&mut self);
}
