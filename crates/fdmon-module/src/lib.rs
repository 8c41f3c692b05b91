//! # fdmon-module: Engine implementations and the benchmark driver
//!
//! This crate provides one implementation of the `Engine` contract per
//! monitoring backend, plus everything needed to drive them: the channel
//! fabric, the closed-loop load generator, the run deadline and the
//! coordinator that wires them together.
//!
//! ## Engines
//!
//! | EngineKind | Impl                 | Worker threads per instance |
//! |------------|----------------------|-----------------------------|
//! | Select     | `select::create`     | 1                           |
//! | Poll       | `poll::create`       | 1                           |
//! | Epoll      | `epoll::create`      | 1                           |
//! | IoUring    | `uring::create`      | 1                           |
//! | Threads    | `threads::ThreadsEngine` | `num_fds`               |
//!
//! ## Run order
//!
//! ```text
//! ChannelFabric::new → EngineSet::create → LoadGenerator::run (until Deadline)
//!                    → EngineSet::shutdown → drop(ChannelFabric)
//! ```

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod sys;
        pub mod control;
        pub mod latch;
        pub mod worker;

        pub mod select;
        pub mod poll;
        pub mod epoll;
        pub mod uring;
        pub mod threads;

        pub mod factory;
        pub mod fabric;
        pub mod generator;
        pub mod deadline;
        pub mod coordinator;

        pub use coordinator::{run, RunReport};
        pub use factory::{create_engine, EngineSet};
        pub use fabric::ChannelFabric;
        pub use generator::{LoadGenerator, RunOutcome};
    } else {
        compile_error!("fdmonbench measures Linux readiness APIs and only builds on Linux");
    }
}
