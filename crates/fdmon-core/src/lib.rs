//! # fdmon-core: Trait definitions for fdmonbench
//!
//! This crate defines the boundary between the benchmark driver and the
//! file-descriptor monitoring engines it measures. It holds no OS code:
//! every engine implementation lives in `fdmon-module`.
//!
//! ## Modules
//!
//! - `engine` - `Engine` trait, `EngineKind` capability table, lifecycle states
//! - `config` - `BenchConfig` (whole run) and `EngineConfig` (one engine instance)
//! - `stop` - `StopToken` shared between the run deadline and the load generator
//! - `stats` - `RunStatistics` and the CSV report
//! - `error` - Error types
//!
//! ## Design principle
//!
//! > "An engine is built, runs in the background, and is torn down.
//! >  Nothing else crosses the boundary."
//!
//! The contract is intentionally two operations wide: construction (a
//! factory in `fdmon-module`) and `Engine::shutdown`. Everything a caller
//! may ask about an engine beyond that is a read-only query.

pub mod engine;
pub mod config;
pub mod stop;
pub mod stats;
pub mod error;

pub use config::{BenchConfig, EngineConfig};
pub use engine::{Engine, EngineKind, EngineState};
pub use error::{FdmonError, Result};
pub use stats::RunStatistics;
pub use stop::StopToken;
