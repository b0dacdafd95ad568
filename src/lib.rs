//! Coverage-driven constrained-random verification of a dual-clock FIFO.
//!
//! The harness runs on a small cooperative runtime: every testbench component
//! (generator, adapter driver, monitors, scoreboard, coverage collector) is a
//! task on a single-threaded executor that only suspends on clock edges and
//! channel operations. The device under test sits behind [`sim_if::SimIf`];
//! [`dut::FifoDut`] is a behavioral stand-in used by the binary and the tests.

mod executor;
mod tb_obj;
mod trigger;

pub mod adapter;
pub mod coverage;
pub mod dut;
pub mod env;
pub mod generator;
pub mod model;
pub mod prelude;
pub mod report;
pub mod scoreboard;
pub mod signal;
pub mod sim;
pub mod sim_if;
pub mod transaction;
pub mod utils;

pub use executor::{Executor, JoinHandle, Spawner};
pub use tb_obj::TbObj;
pub use trigger::{ClockDomain, Trigger};

use signal::Signal;
use thiserror::Error;

pub type TbResult<T> = Result<T, TbError>;

#[derive(Debug, Error)]
pub enum TbError {
    #[error("signal {signal:?}: {reason}")]
    Signal { signal: Signal, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("simulation stopped at {time_ps} ps before the run completed")]
    Timeout { time_ps: u64 },

    #[error("simulation stalled at {time_ps} ps: no task is waiting on a clock edge")]
    Stalled { time_ps: u64 },

    #[error("task '{task}' was cancelled before it completed")]
    Cancelled { task: String },

    #[error("channel '{0}' closed")]
    ChannelClosed(&'static str),

    #[error("coverage: {0}")]
    Coverage(String),

    #[error("scoreboard reported {count} mismatch(es), first: {first}")]
    Mismatch { count: usize, first: String },

    #[error("{count} coverage bin(s) not confirmed, first: {first}")]
    CoverageGap { count: usize, first: String },

    #[error("report: {0}")]
    Report(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
