//! Running one test in its own process.

use super::Result;

use eyre::WrapErr;
use nix::sys::wait::WaitStatus;
use nix::unistd::{dup2_stderr, dup2_stdin, dup2_stdout, ForkResult, Pid};
use std::fs::File;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, error, warn};

use crate::capture::TestCaptures;
use crate::context::{SharedContext, TestContext};
use crate::group::TestSpec;
use crate::handshake::{stop_for_patching, StopHandshake, StopOutcome};
use crate::monkeypatch::{Monkeypatcher, PatchGoal};
use crate::process::{clean_fork, exit_interrupted, exit_with, kill_and_reap};
use crate::report::Reporter;
use crate::result_code::ResultCode;
use crate::signals::unblock_all_signals;
use crate::wait::{ProcessWaiter, WaitOutcome};

/// Maps how a test process ended to its outcome.
///
/// A timeout is a failure and is never inverted by XFAIL; neither are ERROR
/// and SKIP.
pub fn classify(outcome: &WaitOutcome, xfail: bool) -> ResultCode {
    match outcome {
        WaitOutcome::TimedOut => ResultCode::Fail,
        WaitOutcome::Exited(WaitStatus::Exited(_, status)) => {
            let code = ResultCode::from_exit_code(*status);
            if xfail {
                code.invert_expected_failure()
            } else {
                code
            }
        }
        _ => ResultCode::Error,
    }
}

/// Everything needed to run the tests of one group, one process each.
pub struct TestExecutor<'a> {
    pub shared: SharedContext,
    pub patches: &'a [PatchGoal],
    pub patcher: &'a Monkeypatcher,
    pub waiter: &'a dyn ProcessWaiter,
    pub reporter: Reporter,
    pub capture_dir: &'a Path,
    pub verbose: bool,
}

impl TestExecutor<'_> {
    /// Runs `test` to completion and reports its result line.
    ///
    /// Failures to set the test up are that test's ERROR; they never abort the
    /// group.
    pub fn run(&self, test: &TestSpec) -> ResultCode {
        let captures = match TestCaptures::new(self.capture_dir) {
            Ok(captures) => captures,
            Err(e) => {
                error!("failed to create capture files for {}: {}", test.name(), e);
                self.reporter.test_error(test.name(), "Failed to create capture files");
                return ResultCode::Error;
            }
        };

        let child = match unsafe { clean_fork() } {
            Ok(ForkResult::Child) => self.run_child(test, &captures),
            Ok(ForkResult::Parent { child }) => child,
            Err(e) => {
                error!("failed to fork for {}: {}", test.name(), e);
                self.reporter.test_error(test.name(), "Failed to fork");
                return ResultCode::Error;
            }
        };
        debug!("test {} running as {}", test.name(), child);

        let outcome = match self.supervise(child, test) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{:#}", e);
                self.reporter.test_error(test.name(), &e.to_string());
                self.reporter.captured_output(&captures);
                return ResultCode::Error;
            }
        };

        let code = classify(&outcome, test.is_xfail());
        match outcome {
            WaitOutcome::Interrupted => exit_interrupted(),
            WaitOutcome::TimedOut => self.reporter.test_timed_out(test.name()),
            WaitOutcome::Exited(WaitStatus::Signaled(_, signal, _)) => {
                self.reporter.test_signaled(test.name(), signal)
            }
            WaitOutcome::Exited(WaitStatus::Exited(..)) => {
                self.reporter.test_result(test.name(), code, test.is_xfail())
            }
            WaitOutcome::Exited(other) => {
                warn!("unexpected wait status for {}: {:?}", test.name(), other);
                self.reporter.test_error(test.name(), "Unexpected wait status")
            }
        }

        if self.verbose || code.shows_output() {
            self.reporter.captured_output(&captures);
        }
        code
    }

    /// Applies patches when there are any, then waits for the test to end.
    fn supervise(&self, child: Pid, test: &TestSpec) -> Result<WaitOutcome> {
        if !self.patches.is_empty() {
            if let Some(early) = self.patch_and_resume(child)? {
                return Ok(early);
            }
        }
        self.waiter
            .wait(child, test.timeout())
            .wrap_err("Failed to wait for test process")
    }

    /// Returns how the child ended if it did so before it could be resumed.
    fn patch_and_resume(&self, child: Pid) -> Result<Option<WaitOutcome>> {
        let mut handshake = StopHandshake::new(child);
        match handshake
            .await_stop()
            .wrap_err("Failed to stop test for patching")?
        {
            StopOutcome::Stopped => {}
            StopOutcome::Exited(status) => return Ok(Some(WaitOutcome::Exited(status))),
            StopOutcome::Interrupted => return Ok(Some(WaitOutcome::Interrupted)),
        }

        if let Err(e) = self.patcher.apply(child, self.patches) {
            kill_and_reap(child);
            return Err(e).wrap_err("Failed to apply patches");
        }
        handshake.resume().wrap_err("Failed to resume patched test")?;
        Ok(None)
    }

    fn run_child(&self, test: &TestSpec, captures: &TestCaptures) -> ! {
        let log = match self.prepare_child(captures) {
            Ok(log) => log,
            Err(e) => {
                eprintln!("test setup failed: {:#}", e);
                exit_with(ResultCode::Error)
            }
        };

        let ctx = TestContext::new(
            Rc::clone(&self.shared),
            log,
            self.reporter.color(),
            self.patcher.originals(),
        );
        match panic::catch_unwind(AssertUnwindSafe(|| test.invoke(&ctx))) {
            Ok(()) => exit_with(ResultCode::Ok),
            Err(_) => exit_with(ResultCode::Fail),
        }
    }

    fn prepare_child(&self, captures: &TestCaptures) -> Result<File> {
        let null = File::open("/dev/null").wrap_err("open /dev/null")?;
        dup2_stdin(&null).wrap_err("redirect stdin")?;
        dup2_stdout(captures.stdout.file()).wrap_err("redirect stdout")?;
        dup2_stderr(captures.stderr.file()).wrap_err("redirect stderr")?;
        unblock_all_signals().wrap_err("unblock signals")?;

        if !self.patches.is_empty() {
            stop_for_patching().wrap_err("stop for patching")?;
        }
        Ok(captures.log.try_clone_file()?)
    }
}
