//! Run coordinator: one benchmark run from configuration to report.
//!
//! ```text
//! validate → ChannelFabric → EngineSet (ready) → Deadline::arm
//!          → LoadGenerator::run → disarm → drop engines → drop fabric
//! ```
//!
//! The generator runs on the calling thread; that thread is the one the
//! deadline interrupts.

use fdmon_core::config::BenchConfig;
use fdmon_core::error::{FdmonError, Result};
use fdmon_core::stats::RunStatistics;
use fdmon_core::stop::StopToken;

use crate::deadline::Deadline;
use crate::fabric::ChannelFabric;
use crate::factory::EngineSet;
use crate::generator::LoadGenerator;

use tracing::{debug, info};

/// Result of a completed run.
#[derive(Debug)]
pub struct RunReport {
    pub stats: RunStatistics,
    /// Data-path failure that ended the run early. The statistics still
    /// cover everything up to that point.
    pub error: Option<FdmonError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Execute one benchmark run.
///
/// Construction failures (fabric, any engine instance, the deadline)
/// unwind whatever was built and are returned as `Err`. Once the
/// generator has started, the run always produces a report.
pub fn run(config: &BenchConfig) -> Result<RunReport> {
    config.validate()?;
    info!(
        engine = config.engine.name(),
        num_engines = config.num_engines,
        num_fds = config.num_fds,
        msg_size = config.msg_size,
        exclusive = config.exclusive,
        duration_secs = config.duration.as_secs_f64(),
        "starting run"
    );

    let fabric = ChannelFabric::new(config.num_fds)?;
    let mut engines = EngineSet::create(
        &config.engine_config(),
        config.num_engines,
        &fabric.engine_fds(),
    )?;
    let mut generator = LoadGenerator::new(config, fabric.client_fds())?;

    let stop = StopToken::new();
    let mut deadline = Deadline::arm(config.duration, stop.clone())?;
    let outcome = generator.run(&stop);
    deadline.disarm();

    engines.shutdown();
    drop(engines);
    drop(fabric);
    debug!(round_trips = outcome.stats.round_trips, "run torn down");

    Ok(RunReport {
        stats: outcome.stats,
        error: outcome.error,
    })
}
