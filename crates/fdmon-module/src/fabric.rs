//! `ChannelFabric`: the bidirectional byte channels under test.
//!
//! One `AF_UNIX`/`SOCK_STREAM` socketpair per channel. The engine side
//! is non-blocking (engines must never stall on a lost race); the client
//! side stays blocking for the generator's closed loop. Both ends are
//! `OwnedFd`s and close when the fabric is dropped.

use fdmon_core::error::{FdmonError, Result};

use crate::sys;

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockProtocol, SockType};

use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

/// Both endpoints of one channel.
#[derive(Debug)]
pub struct ChannelPair {
    engine: OwnedFd,
    client: OwnedFd,
}

impl ChannelPair {
    pub fn open() -> Result<Self> {
        let (engine, client) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None::<SockProtocol>,
            SockFlag::SOCK_CLOEXEC,
        )
        .map_err(|errno| FdmonError::Fabric(io::Error::from(errno)))?;

        sys::set_nonblocking(engine.as_raw_fd(), true).map_err(FdmonError::Fabric)?;
        Ok(Self { engine, client })
    }

    /// The end watched by engines.
    pub fn engine_fd(&self) -> RawFd {
        self.engine.as_raw_fd()
    }

    /// The end driven by the load generator.
    pub fn client_fd(&self) -> RawFd {
        self.client.as_raw_fd()
    }
}

#[derive(Debug)]
pub struct ChannelFabric {
    pairs: Vec<ChannelPair>,
}

impl ChannelFabric {
    /// Open `num_fds` channels. Already opened pairs are closed again if
    /// a later one fails.
    pub fn new(num_fds: usize) -> Result<Self> {
        let mut pairs = Vec::new();
        pairs
            .try_reserve_exact(num_fds)
            .map_err(|_| FdmonError::OutOfMemory)?;
        for _ in 0..num_fds {
            pairs.push(ChannelPair::open()?);
        }
        Ok(Self { pairs })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[ChannelPair] {
        &self.pairs
    }

    /// Engine-side descriptors, in channel order.
    pub fn engine_fds(&self) -> Vec<RawFd> {
        self.pairs.iter().map(ChannelPair::engine_fd).collect()
    }

    /// Client-side descriptors, in channel order.
    pub fn client_fds(&self) -> Vec<RawFd> {
        self.pairs.iter().map(ChannelPair::client_fd).collect()
    }
}
