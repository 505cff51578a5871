use std::fmt;

/// Outcome of a single test, also used as the exit status of test and group
/// processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResultCode {
    Ok = 0,
    Fail = 1,
    Error = 2,
    Skip = 3,
}

impl ResultCode {
    /// Interprets a process exit status. Anything outside the four known codes
    /// means the process did not exit through the framework and is an error.
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => ResultCode::Ok,
            1 => ResultCode::Fail,
            3 => ResultCode::Skip,
            _ => ResultCode::Error,
        }
    }

    pub fn exit_code(self) -> i32 {
        self as i32
    }

    /// FAIL and ERROR count against the run and trigger fail-fast.
    pub fn is_failure(self) -> bool {
        matches!(self, ResultCode::Fail | ResultCode::Error)
    }

    /// Whether captured output is shown when not running verbosely.
    pub fn shows_output(self) -> bool {
        self.is_failure()
    }

    /// Swaps OK and FAIL for tests flagged as expected failures.
    pub fn invert_expected_failure(self) -> Self {
        match self {
            ResultCode::Ok => ResultCode::Fail,
            ResultCode::Fail => ResultCode::Ok,
            other => other,
        }
    }

    /// The word printed on a result line.
    pub fn label(self, xfail: bool) -> &'static str {
        match (self, xfail) {
            (ResultCode::Ok, false) => "PASSED",
            (ResultCode::Ok, true) => "XFAILED",
            (ResultCode::Fail, false) => "FAILED",
            (ResultCode::Fail, true) => "XPASSED",
            (ResultCode::Skip, _) => "SKIPPED",
            (ResultCode::Error, _) => "ERROR",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label(false))
    }
}
