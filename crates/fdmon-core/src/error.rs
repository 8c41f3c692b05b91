//! fdmonbench error types.

use std::io;
use std::os::unix::io::RawFd;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FdmonError {
    /// Buffer or registration structure could not be allocated.
    #[error("Out of memory")]
    OutOfMemory,

    /// Exclusive wakeup requested on a backend that cannot provide it.
    #[error("{engine} engine does not support exclusive=1")]
    ExclusiveUnsupported { engine: &'static str },

    /// A descriptor is beyond what the backend can monitor.
    #[error("Maximum number of fds exceeded for {engine} engine (fd {fd} >= {limit})")]
    CapacityExceeded {
        engine: &'static str,
        fd: RawFd,
        limit: RawFd,
    },

    /// The notification primitive itself could not be created or fed.
    #[error("{what}: {source}")]
    BackendSetup {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    /// The ready handshake with a worker thread broke down.
    #[error("startup handshake failed: {0}")]
    Handshake(&'static str),

    /// A worker thread could not be started.
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    /// A socket pair for the channel fabric could not be created.
    #[error("socketpair failed: {0}")]
    Fabric(#[source] io::Error),

    /// Data-path syscall failed outside of a requested stop.
    #[error("{op} failed on fd {fd}: {source}")]
    Io {
        op: &'static str,
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    /// Data-path syscall moved fewer bytes than one message.
    #[error("{op} failed on fd {fd}: ret {got} (expected {expected})")]
    ShortTransfer {
        op: &'static str,
        fd: RawFd,
        got: usize,
        expected: usize,
    },

    /// The echoed message differs from what was sent.
    #[error("echo mismatch on fd {fd} at round trip {round_trip}")]
    EchoMismatch { fd: RawFd, round_trip: u64 },

    /// Unknown `--engine` value.
    #[error("Unknown engine '{0}'")]
    UnknownEngine(String),

    /// Invalid run configuration.
    #[error("{0}")]
    Config(&'static str),

    /// Signal or timer wiring for the run deadline failed.
    #[error("run deadline: {0}")]
    Deadline(#[source] io::Error),
}

impl FdmonError {
    /// Build a `BackendSetup` error from the current `errno`.
    pub fn setup_last_os(what: &'static str) -> Self {
        Self::BackendSetup {
            what,
            source: io::Error::last_os_error(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FdmonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_human_readable() {
        let e = FdmonError::ExclusiveUnsupported { engine: "select" };
        assert_eq!(e.to_string(), "select engine does not support exclusive=1");

        let e = FdmonError::CapacityExceeded { engine: "select", fd: 1030, limit: 1024 };
        assert_eq!(
            e.to_string(),
            "Maximum number of fds exceeded for select engine (fd 1030 >= 1024)"
        );

        let e = FdmonError::ShortTransfer { op: "write", fd: 7, got: 0, expected: 64 };
        assert_eq!(e.to_string(), "write failed on fd 7: ret 0 (expected 64)");
    }

    #[test]
    fn test_setup_error_keeps_source() {
        let e = FdmonError::BackendSetup {
            what: "epoll_create1 failed",
            source: io::Error::new(io::ErrorKind::Other, "too many open files"),
        };
        assert!(std::error::Error::source(&e).is_some());
        assert!(e.to_string().starts_with("epoll_create1 failed: "));
    }
}
