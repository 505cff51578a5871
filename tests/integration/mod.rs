//! Integration tests driving the `forktest-selftest` binary
//!
//! Each scenario runs one demonstration suite as a separate process and checks
//! its result lines, summary block, exit status and leftover processes.

pub mod infrastructure;
pub mod scenarios;

pub use infrastructure::{SelftestHarness, SelftestRun, Summary};
