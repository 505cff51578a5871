pub mod selftest_harness;
pub mod summary_assertions;

pub use selftest_harness::{process_group_alive, SelftestHarness, SelftestRun, Summary};
pub use summary_assertions::*;
