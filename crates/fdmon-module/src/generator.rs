//! `LoadGenerator`: the closed-loop client.
//!
//! One message in flight at a time: write `msg_size` bytes to a channel,
//! block until the echo comes back, count it, pick the next channel at
//! random. The first channel is always index 0.
//!
//! Stop handling: the stop token is checked before each round trip and
//! right after every blocking call returns. A call cut short by the
//! deadline signal therefore ends the run cleanly instead of being
//! reported as a failure.

use fdmon_core::config::BenchConfig;
use fdmon_core::error::{FdmonError, Result};
use fdmon_core::stats::RunStatistics;
use fdmon_core::stop::StopToken;

use crate::sys;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

/// What `LoadGenerator::run` measured, plus the protocol error that
/// ended it early, if any.
#[derive(Debug)]
pub struct RunOutcome {
    pub stats: RunStatistics,
    pub error: Option<FdmonError>,
}

/// How a blocking transfer ended.
enum Transfer {
    Complete,
    Stopped,
}

pub struct LoadGenerator {
    fds: Vec<RawFd>,
    send_buf: Vec<u8>,
    recv_buf: Vec<u8>,
    verify_echo: bool,
    limit: Option<u64>,
    rng: SmallRng,
    round_trips: Arc<AtomicU64>,
}

impl LoadGenerator {
    /// Build a generator over the client-side descriptors of a fabric.
    ///
    /// Channel selection is seeded from `config.seed`, or from the
    /// calling thread's id when unset.
    pub fn new(config: &BenchConfig, client_fds: Vec<RawFd>) -> Result<Self> {
        if client_fds.is_empty() {
            return Err(FdmonError::Config("Invalid number of fds"));
        }
        let seed = config.seed.unwrap_or_else(sys::gettid);
        debug!(seed, channels = client_fds.len(), "load generator seeded");

        Ok(Self {
            fds: client_fds,
            send_buf: sys::message_buffer(config.msg_size)?,
            recv_buf: sys::message_buffer(config.msg_size)?,
            verify_echo: config.verify_echo,
            limit: config.round_trip_limit,
            rng: SmallRng::seed_from_u64(seed),
            round_trips: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Shared handle on the round-trip counter, readable while `run`
    /// is in progress.
    pub fn counter(&self) -> Arc<AtomicU64> {
        self.round_trips.clone()
    }

    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::Acquire)
    }

    /// Drive round trips until `stop` is raised, the round-trip limit is
    /// reached, or a transfer fails.
    pub fn run(&mut self, stop: &StopToken) -> RunOutcome {
        let start_cpu = cpu_time();
        let start = Instant::now();

        let mut count = self.round_trips();
        let mut current = 0;
        let mut failure = None;

        while !stop.is_stopped() {
            match self.round_trip(current, count, stop) {
                Ok(Transfer::Complete) => {}
                Ok(Transfer::Stopped) => break,
                Err(e) => {
                    error!(error = %e, "load generator stopped");
                    failure = Some(e);
                    break;
                }
            }

            count += 1;
            self.round_trips.store(count, Ordering::Release);

            if self.limit.is_some_and(|limit| count >= limit) {
                break;
            }
            current = self.rng.gen_range(0..self.fds.len());
        }

        let duration = start.elapsed();
        let cpu_time = match (start_cpu, cpu_time()) {
            (Some(begin), Some(end)) => end.saturating_sub(begin),
            _ => Duration::ZERO,
        };
        let stats = RunStatistics {
            duration,
            cpu_time,
            round_trips: count,
        };
        debug!(round_trips = count, "load generator finished");
        RunOutcome {
            stats,
            error: failure,
        }
    }

    /// One write/read exchange on channel `index`.
    fn round_trip(&mut self, index: usize, count: u64, stop: &StopToken) -> Result<Transfer> {
        let fd = self.fds[index];

        if self.verify_echo {
            stamp(&mut self.send_buf, count);
        }

        let send_buf = &self.send_buf;
        let sent = transfer(stop, "Write", fd, send_buf.len(), || {
            sys::write_fd(fd, send_buf)
        })?;
        if let Transfer::Stopped = sent {
            return Ok(Transfer::Stopped);
        }

        let recv_buf = &mut self.recv_buf;
        let expected = recv_buf.len();
        let received = transfer(stop, "Read", fd, expected, || {
            sys::read_fd(fd, &mut recv_buf[..])
        })?;
        if let Transfer::Stopped = received {
            return Ok(Transfer::Stopped);
        }

        if self.verify_echo && self.recv_buf != self.send_buf {
            return Err(FdmonError::EchoMismatch {
                fd,
                round_trip: count,
            });
        }
        Ok(Transfer::Complete)
    }
}

/// Run one blocking syscall to completion, retrying interruptions that
/// were not caused by a stop request.
fn transfer<F>(
    stop: &StopToken,
    op: &'static str,
    fd: RawFd,
    expected: usize,
    mut call: F,
) -> Result<Transfer>
where
    F: FnMut() -> io::Result<usize>,
{
    loop {
        let ret = call();
        if stop.is_stopped() {
            return Ok(Transfer::Stopped);
        }
        match ret {
            Ok(got) if got == expected => return Ok(Transfer::Complete),
            Ok(got) => {
                return Err(FdmonError::ShortTransfer {
                    op,
                    fd,
                    got,
                    expected,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(source) => return Err(FdmonError::Io { op, fd, source }),
        }
    }
}

/// Process CPU time, or `None` when the kernel will not report it.
fn cpu_time() -> Option<Duration> {
    sys::process_cpu_time()
        .map_err(|err| warn!(error = %err, "getrusage failed, CPU usage reads as 0"))
        .ok()
}

/// Write the round-trip number into the head of the message.
fn stamp(buf: &mut [u8], round_trip: u64) {
    let bytes = round_trip.to_le_bytes();
    let n = buf.len().min(bytes.len());
    buf[..n].copy_from_slice(&bytes[..n]);
}
