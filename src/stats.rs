use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::process::ExitCode;

use crate::result_code::ResultCode;

/// Per-outcome counters for a group or a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub passed: u32,
    pub skipped: u32,
    pub failed: u32,
    pub errored: u32,
}

impl RunStats {
    /// Stats attributing the same outcome to `count` tests, used when a whole
    /// group fails before its tests can report individually.
    pub fn uniform(code: ResultCode, count: usize) -> Self {
        let mut stats = Self::default();
        for _ in 0..count {
            stats.record(code);
        }
        stats
    }

    pub fn record(&mut self, code: ResultCode) {
        match code {
            ResultCode::Ok => self.passed += 1,
            ResultCode::Skip => self.skipped += 1,
            ResultCode::Fail => self.failed += 1,
            ResultCode::Error => self.errored += 1,
        }
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.passed += other.passed;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.errored += other.errored;
    }

    pub fn total(&self) -> u32 {
        self.passed + self.skipped + self.failed + self.errored
    }

    pub fn has_failures(&self) -> bool {
        self.failed + self.errored > 0
    }

    /// Process exit status for a harness: success iff nothing failed or errored.
    pub fn exit_code(&self) -> ExitCode {
        if self.has_failures() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        }
    }

    /// Sends the stats to the runner over the group pipe.
    pub fn write_to(&self, writer: impl Write) -> bincode::Result<()> {
        bincode::serialize_into(writer, self)
    }

    pub fn read_from(reader: impl Read) -> bincode::Result<Self> {
        bincode::deserialize_from(reader)
    }
}
