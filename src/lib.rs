//! Process-isolated unit testing.
//!
//! Every group of tests runs in its own forked process and every test runs in a
//! process forked from its group, so crashes, hangs and clobbered global state
//! stay contained. Outcomes travel back up the chain as exit codes and a small
//! statistics record written over a pipe.
//!
//! Groups may also register monkeypatches: before a test body runs, the calls
//! other images make through their indirection slots for a named function are
//! redirected to a replacement.

pub type Result<T> = eyre::Result<T>;

pub mod capture;
pub mod cli;
pub mod context;
pub mod executor;
pub mod group;
mod group_runner;
pub mod handshake;
pub mod monkeypatch;
pub mod process;
pub mod report;
pub mod result_code;
pub mod runner;
pub mod signals;
pub mod stats;
pub mod wait;

pub use context::{SharedContext, TestContext};
pub use group::{GroupSpec, TestFlags, TestSpec};
pub use monkeypatch::{PatchError, PatchGoal};
pub use result_code::ResultCode;
pub use runner::{ColorChoice, RunFlags, RunOptions, Runner};
pub use stats::RunStats;
