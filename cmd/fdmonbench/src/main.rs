//! fdmonbench
//!
//! Measures how much CPU a file descriptor monitoring API costs per
//! message. A closed-loop generator bounces messages off N engine
//! instances over socketpairs for a fixed duration, then prints one CSV
//! report on stdout.
//!
//! Usage:
//!     cargo build --release -p fdmonbench
//!     ./target/release/fdmonbench --engine=epoll --num-fds=64 --duration-secs=10
//!
//!     # Several instances sharing the descriptors, exclusive wakeup:
//!     ./target/release/fdmonbench --engine=io_uring --num-engines=4 --exclusive=1
//!
//! Logging goes to stderr, filtered by `FDMON_LOG` (default `warn`),
//! e.g. `FDMON_LOG=fdmon_module=debug`.

use fdmon_core::{BenchConfig, EngineKind};
use fdmon_module::coordinator;

use clap::{ArgAction, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use std::io;
use std::num::{NonZeroU64, NonZeroUsize};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "fdmonbench", version, about)]
struct Args {
    /// Run duration in seconds
    #[arg(long, env = "FDMON_DURATION_SECS", default_value = "30")]
    duration_secs: NonZeroU64,

    /// Monitoring engine (epoll, io_uring, poll, select, threads)
    #[arg(long, env = "FDMON_ENGINE", default_value = "select", value_parser = parse_engine)]
    engine: EngineKind,

    /// Use exclusive wakeup, 0 or 1 (epoll and io_uring only)
    #[arg(
        long,
        env = "FDMON_EXCLUSIVE",
        default_value = "0",
        action = ArgAction::Set,
        value_parser = parse_exclusive
    )]
    exclusive: bool,

    /// Message size in bytes
    #[arg(long, env = "FDMON_MSG_SIZE", default_value = "1")]
    msg_size: NonZeroUsize,

    /// Number of engine instances watching the same descriptors
    #[arg(long, env = "FDMON_NUM_ENGINES", default_value = "1")]
    num_engines: NonZeroUsize,

    /// Number of channels
    #[arg(long, env = "FDMON_NUM_FDS", default_value = "1")]
    num_fds: NonZeroUsize,

    /// Check every echoed message against what was sent
    #[arg(long, env = "FDMON_VERIFY_ECHO")]
    verify_echo: bool,

    /// Seed for channel selection (default: generator thread id)
    #[arg(long, env = "FDMON_SEED")]
    seed: Option<u64>,

    /// Print the available engines and exit
    #[arg(long)]
    list_engines: bool,
}

fn parse_engine(s: &str) -> Result<EngineKind, String> {
    s.parse().map_err(|e: fdmon_core::FdmonError| e.to_string())
}

fn parse_exclusive(s: &str) -> Result<bool, String> {
    match s {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err("The value of exclusive must be 0 or 1".to_string()),
    }
}

impl Args {
    fn to_config(&self) -> BenchConfig {
        let mut config = BenchConfig::new()
            .engine(self.engine)
            .num_engines(self.num_engines.get())
            .num_fds(self.num_fds.get())
            .msg_size(self.msg_size.get())
            .exclusive(self.exclusive)
            .duration(Duration::from_secs(self.duration_secs.get()))
            .verify_echo(self.verify_echo);
        if let Some(seed) = self.seed {
            config = config.seed(seed);
        }
        config
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("FDMON_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_thread_names(true)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    if args.list_engines {
        for kind in EngineKind::ALL {
            let note = if kind.supports_exclusive() {
                " (supports --exclusive=1)"
            } else {
                ""
            };
            println!("{kind}{note}");
        }
        return ExitCode::SUCCESS;
    }

    let config = args.to_config();
    debug!(?config, "parsed command line");

    let report = match coordinator::run(&config) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = report.stats.write_csv(io::stdout().lock()) {
        eprintln!("failed to write report: {e}");
        return ExitCode::FAILURE;
    }

    match report.error {
        None => ExitCode::SUCCESS,
        Some(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("fdmonbench").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap().to_config();
        assert_eq!(config.engine, EngineKind::Select);
        assert_eq!(config.num_engines, 1);
        assert_eq!(config.num_fds, 1);
        assert_eq!(config.msg_size, 1);
        assert!(!config.exclusive);
        assert_eq!(config.duration, Duration::from_secs(30));
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_full_command_line() {
        let args = parse(&[
            "--engine=io_uring",
            "--num-engines=4",
            "--num-fds=64",
            "--msg-size=4096",
            "--exclusive=1",
            "--duration-secs=5",
            "--verify-echo",
            "--seed=9",
        ])
        .unwrap();
        let config = args.to_config();
        assert_eq!(config.engine, EngineKind::IoUring);
        assert_eq!(config.num_engines, 4);
        assert_eq!(config.num_fds, 64);
        assert_eq!(config.msg_size, 4096);
        assert!(config.exclusive);
        assert_eq!(config.duration, Duration::from_secs(5));
        assert!(config.verify_echo);
        assert_eq!(config.seed, Some(9));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(parse(&["--engine=kqueue"]).is_err());
        assert!(parse(&["--exclusive=2"]).is_err());
        assert!(parse(&["--num-fds=0"]).is_err());
        assert!(parse(&["--msg-size=0"]).is_err());
        assert!(parse(&["--num-engines=0"]).is_err());
        assert!(parse(&["--duration-secs=0"]).is_err());
        assert!(parse(&["--duration-secs=-1"]).is_err());
        assert!(parse(&["stray"]).is_err());
    }

    #[test]
    fn test_exclusive_on_select_parses_but_fails_validation() {
        let config = parse(&["--exclusive=1"]).unwrap().to_config();
        assert!(config.validate().is_err());
    }
}
