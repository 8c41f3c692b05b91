//! Run and engine configuration

use std::time::Duration;

use crate::engine::EngineKind;
use crate::error::{FdmonError, Result};

/// Configuration for one benchmark run
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Monitoring backend
    pub engine: EngineKind,

    /// Number of engine instances sharing the descriptor set
    pub num_engines: usize,

    /// Number of channels (descriptor pairs)
    pub num_fds: usize,

    /// Bytes per message
    pub msg_size: usize,

    /// Ask for exclusive wakeup (epoll/io_uring only)
    pub exclusive: bool,

    /// How long the generator runs
    pub duration: Duration,

    /// Compare every echo against what was sent
    pub verify_echo: bool,

    /// Seed for channel selection (defaults to the generator's thread id)
    pub seed: Option<u64>,

    /// Stop after this many round trips even if time remains
    pub round_trip_limit: Option<u64>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Select,
            num_engines: 1,
            num_fds: 1,
            msg_size: 1,
            exclusive: false,
            duration: Duration::from_secs(30),
            verify_echo: false,
            seed: None,
            round_trip_limit: None,
        }
    }
}

impl BenchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(mut self, kind: EngineKind) -> Self {
        self.engine = kind;
        self
    }

    pub fn num_engines(mut self, n: usize) -> Self {
        self.num_engines = n;
        self
    }

    pub fn num_fds(mut self, n: usize) -> Self {
        self.num_fds = n;
        self
    }

    pub fn msg_size(mut self, n: usize) -> Self {
        self.msg_size = n;
        self
    }

    pub fn exclusive(mut self, enable: bool) -> Self {
        self.exclusive = enable;
        self
    }

    pub fn duration(mut self, d: Duration) -> Self {
        self.duration = d;
        self
    }

    pub fn verify_echo(mut self, enable: bool) -> Self {
        self.verify_echo = enable;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn round_trip_limit(mut self, n: u64) -> Self {
        self.round_trip_limit = Some(n);
        self
    }

    /// Settings handed to each engine instance.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            kind: self.engine,
            num_fds: self.num_fds,
            msg_size: self.msg_size,
            exclusive: self.exclusive,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_engines == 0 {
            return Err(FdmonError::Config("Invalid number of engines"));
        }
        if self.duration.is_zero() {
            return Err(FdmonError::Config("Invalid duration-secs value"));
        }
        if self.round_trip_limit == Some(0) {
            return Err(FdmonError::Config("round trip limit must be at least 1"));
        }
        self.engine_config().validate()
    }
}

/// Settings one engine instance is built from. Immutable once the
/// instance exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub kind: EngineKind,
    pub num_fds: usize,
    pub msg_size: usize,
    pub exclusive: bool,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_fds == 0 {
            return Err(FdmonError::Config("Invalid number of fds"));
        }
        if self.msg_size == 0 {
            return Err(FdmonError::Config("Invalid message size"));
        }
        if self.exclusive && !self.kind.supports_exclusive() {
            return Err(FdmonError::ExclusiveUnsupported {
                engine: self.kind.name(),
            });
        }
        Ok(())
    }
}
