//! Engine construction by `EngineKind`, and `EngineSet`, the N instances
//! that share one descriptor set during a run.

use fdmon_core::config::EngineConfig;
use fdmon_core::engine::{Engine, EngineKind};
use fdmon_core::error::{FdmonError, Result};

use crate::threads::ThreadsEngine;
use crate::{epoll, poll, select, uring};

use std::os::unix::io::RawFd;

use tracing::debug;

/// Build and start one engine instance over `fds`.
///
/// The configuration is validated first, so an unsupported `exclusive`
/// request fails before any resource is acquired.
pub fn create_engine(config: &EngineConfig, fds: &[RawFd]) -> Result<Box<dyn Engine>> {
    config.validate()?;
    if fds.len() != config.num_fds {
        return Err(FdmonError::Config("descriptor count does not match num_fds"));
    }

    let engine: Box<dyn Engine> = match config.kind {
        EngineKind::Select => Box::new(select::create(config, fds)?),
        EngineKind::Poll => Box::new(poll::create(config, fds)?),
        EngineKind::Epoll => Box::new(epoll::create(config, fds)?),
        EngineKind::IoUring => Box::new(uring::create(config, fds)?),
        EngineKind::Threads => Box::new(ThreadsEngine::create(config, fds)?),
    };
    Ok(engine)
}

/// Engine instances of one kind sharing a descriptor set.
///
/// Dropping the set shuts every instance down, in creation order.
#[derive(Debug)]
pub struct EngineSet {
    engines: Vec<Box<dyn Engine>>,
}

impl EngineSet {
    /// Create `count` instances. If instance k fails, instances 0..k are
    /// destroyed before the error is returned.
    pub fn create(config: &EngineConfig, count: usize, fds: &[RawFd]) -> Result<Self> {
        let set = Self::create_with(count, |_| create_engine(config, fds))?;
        debug!(engine = config.kind.name(), count, "engine set running");
        Ok(set)
    }

    /// Build `count` instances with `make`, called once per instance
    /// index. Instances already built are destroyed, in creation order,
    /// when a later one fails.
    pub fn create_with<F>(count: usize, mut make: F) -> Result<Self>
    where
        F: FnMut(usize) -> Result<Box<dyn Engine>>,
    {
        if count == 0 {
            return Err(FdmonError::Config("Invalid number of engines"));
        }

        let mut engines = Vec::new();
        engines
            .try_reserve_exact(count)
            .map_err(|_| FdmonError::OutOfMemory)?;
        for i in 0..count {
            match make(i) {
                Ok(engine) => engines.push(engine),
                Err(e) => {
                    debug!(instance = i, error = %e, "engine set unwinding");
                    return Err(e);
                }
            }
        }
        Ok(Self { engines })
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Engine> {
        self.engines.iter().map(|e| e.as_ref())
    }

    /// Worker threads still attached across all instances.
    pub fn live_workers(&self) -> usize {
        self.engines.iter().map(|e| e.live_workers()).sum()
    }

    /// Destroy every instance. Synchronous and idempotent.
    pub fn shutdown(&mut self) {
        for engine in &mut self.engines {
            engine.shutdown();
        }
    }
}

impl Drop for EngineSet {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::ChannelFabric;
    use crate::sys;
    use crate::testutil::open_fds;
    use fdmon_core::engine::EngineState;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Wraps an engine and records its teardown.
    #[derive(Debug)]
    struct Tracked {
        inner: Box<dyn Engine>,
        destroyed: Arc<AtomicUsize>,
        leftover_workers: Arc<AtomicUsize>,
    }

    impl Engine for Tracked {
        fn kind(&self) -> EngineKind {
            self.inner.kind()
        }

        fn state(&self) -> EngineState {
            self.inner.state()
        }

        fn live_workers(&self) -> usize {
            self.inner.live_workers()
        }

        fn shutdown(&mut self) {
            self.inner.shutdown();
        }
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.inner.shutdown();
            self.leftover_workers
                .fetch_add(self.inner.live_workers(), Ordering::SeqCst);
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(kind: EngineKind, num_fds: usize, exclusive: bool) -> EngineConfig {
        EngineConfig {
            kind,
            num_fds,
            msg_size: 1,
            exclusive,
        }
    }

    fn available(kind: EngineKind) -> bool {
        kind != EngineKind::IoUring || uring::is_supported()
    }

    #[test]
    #[serial]
    fn test_every_kind_creates_and_destroys() {
        for kind in EngineKind::ALL {
            if !available(kind) {
                continue;
            }
            for num_fds in [1, 8, 64] {
                let fabric = ChannelFabric::new(num_fds).unwrap();
                let before = open_fds();

                let mut engine = create_engine(&config(kind, num_fds, false), &fabric.engine_fds())
                    .unwrap_or_else(|e| panic!("{kind}: {e}"));
                assert_eq!(engine.kind(), kind);
                assert_eq!(engine.state(), EngineState::Running);
                assert_eq!(engine.live_workers(), kind.workers_per_instance(num_fds));

                engine.shutdown();
                assert_eq!(engine.state(), EngineState::Destroyed);
                assert_eq!(engine.live_workers(), 0);
                assert_eq!(open_fds(), before, "{kind} leaked descriptors");
            }
        }
    }

    #[test]
    #[serial]
    fn test_exclusive_rejected_without_side_effects() {
        let fabric = ChannelFabric::new(4).unwrap();
        for kind in [EngineKind::Select, EngineKind::Poll, EngineKind::Threads] {
            let before = open_fds();
            let err = create_engine(&config(kind, 4, true), &fabric.engine_fds()).unwrap_err();
            assert!(matches!(err, FdmonError::ExclusiveUnsupported { .. }));
            assert_eq!(err.to_string(), format!("{kind} engine does not support exclusive=1"));
            assert_eq!(open_fds(), before);
        }
    }

    #[test]
    #[serial]
    fn test_descriptor_count_mismatch() {
        let fabric = ChannelFabric::new(2).unwrap();
        let err = create_engine(&config(EngineKind::Poll, 3, false), &fabric.engine_fds());
        assert!(matches!(err, Err(FdmonError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_engine_set() {
        let fabric = ChannelFabric::new(8).unwrap();
        let before = open_fds();

        let mut set = EngineSet::create(&config(EngineKind::Epoll, 8, true), 3, &fabric.engine_fds())
            .unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.live_workers(), 3);
        assert!(set.iter().all(|e| e.state() == EngineState::Running));

        set.shutdown();
        assert_eq!(set.live_workers(), 0);
        assert!(set.iter().all(|e| e.state() == EngineState::Destroyed));
        drop(set);
        assert_eq!(open_fds(), before);
    }

    #[test]
    #[serial]
    fn test_engine_set_debug_names_instances() {
        let fabric = ChannelFabric::new(1).unwrap();
        let set = EngineSet::create(&config(EngineKind::Poll, 1, false), 2, &fabric.engine_fds())
            .unwrap();
        assert!(format!("{set:?}").contains("Poll"));
    }

    #[test]
    #[serial]
    fn test_engine_set_unwinds_running_instances() {
        let fabric = ChannelFabric::new(4).unwrap();
        let fds = fabric.engine_fds();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let leftover = Arc::new(AtomicUsize::new(0));
        let mut started = 0;

        let before = open_fds();
        let err = EngineSet::create_with(3, |i| {
            if i == 2 {
                return Err(FdmonError::Handshake("third instance refused"));
            }
            let inner = create_engine(&config(EngineKind::Epoll, 4, false), &fds)?;
            assert_eq!(inner.state(), EngineState::Running);
            started += 1;
            let tracked: Box<dyn Engine> = Box::new(Tracked {
                inner,
                destroyed: destroyed.clone(),
                leftover_workers: leftover.clone(),
            });
            Ok(tracked)
        })
        .unwrap_err();

        assert!(matches!(err, FdmonError::Handshake(_)));
        assert_eq!(started, 2);
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
        assert_eq!(leftover.load(Ordering::SeqCst), 0);
        assert_eq!(open_fds(), before);

        // The shared descriptors still work for a fresh set.
        let _set = EngineSet::create(&config(EngineKind::Epoll, 4, false), 1, &fds).unwrap();
        let fd = fabric.client_fds()[1];
        assert_eq!(sys::write_fd(fd, b"k").unwrap(), 1);
        let mut back = [0u8; 1];
        assert_eq!(sys::read_fd(fd, &mut back).unwrap(), 1);
    }

    #[test]
    #[serial]
    fn test_engine_set_failure_leaves_nothing_behind() {
        let fabric = ChannelFabric::new(2).unwrap();
        let mut fds = fabric.engine_fds();
        fds.push(select::FD_LIMIT);

        let before = open_fds();
        let err = EngineSet::create(&config(EngineKind::Select, 3, false), 2, &fds).unwrap_err();
        assert!(matches!(err, FdmonError::CapacityExceeded { .. }));
        assert_eq!(open_fds(), before);
    }
}
