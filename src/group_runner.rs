//! Running one group in its own process.
//!
//! The group process runs setup and every test through the [`TestExecutor`],
//! sends its [`RunStats`] to the runner over a pipe, then runs cleanup. If it
//! does not exit cleanly, the runner attributes the group's outcome to every
//! test: to the counted ones when the stats arrived, otherwise to all of them
//! with a result line each.

use super::Result;

use eyre::WrapErr;
use nix::sys::wait::WaitStatus;
use nix::unistd::{dup2_stderr, pipe, ForkResult, Pid};
use std::fs::File;
use std::os::fd::OwnedFd;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{debug, error, info, warn};

use crate::capture::CaptureFile;
use crate::context::{SharedContext, TestContext};
use crate::executor::TestExecutor;
use crate::group::GroupSpec;
use crate::monkeypatch::Monkeypatcher;
use crate::process::{clean_fork, exit_with, reap};
use crate::report::Reporter;
use crate::result_code::ResultCode;
use crate::runner::{RunFlags, RunOptions};
use crate::signals::{block_termination_signals, reset_termination_handlers};
use crate::stats::RunStats;
use crate::wait::ProcessWaiter;

pub(crate) struct GroupRunner<'a> {
    pub group: &'a GroupSpec,
    pub options: &'a RunOptions,
    pub patcher: &'a Monkeypatcher,
    pub waiter: &'a dyn ProcessWaiter,
    pub reporter: Reporter,
}

impl GroupRunner<'_> {
    /// Runs the group and returns its stats. Errors are framework-fatal.
    pub fn run(&self) -> Result<RunStats> {
        let capture = CaptureFile::new(&self.options.capture_dir)
            .wrap_err("Failed to create group capture file")?;
        let (reader, writer) = pipe().wrap_err("Failed to create group pipe")?;

        match unsafe { clean_fork() }.wrap_err("Failed to fork group process")? {
            ForkResult::Child => {
                drop(reader);
                self.run_child(&capture, writer)
            }
            ForkResult::Parent { child } => {
                drop(writer);
                debug!("group of {} test(s) running as {}", self.group.len(), child);
                self.collect(child, reader, &capture)
            }
        }
    }

    fn verbose(&self) -> bool {
        self.options.flags.contains(RunFlags::VERBOSE)
    }

    fn collect(&self, child: Pid, reader: OwnedFd, capture: &CaptureFile) -> Result<RunStats> {
        let status = reap(child).wrap_err("Failed to wait for group process")?;
        // Present only when the test loop finished: the child sends its stats before cleanup
        let ran = RunStats::read_from(File::from(reader));

        let (code, reason) = match (status, ran.as_ref()) {
            (WaitStatus::Exited(_, 0), Ok(stats)) => {
                if self.verbose() {
                    self.reporter.group_output(capture);
                }
                return Ok(*stats);
            }
            (WaitStatus::Exited(_, 0), Err(e)) => {
                error!("failed to read stats from group {}: {}", child, e);
                (ResultCode::Error, "Failed to read group statistics".to_string())
            }
            (WaitStatus::Exited(_, status), ran) => {
                let code = ResultCode::from_exit_code(status);
                let reason = match (code, ran.is_ok()) {
                    (ResultCode::Skip, false) => "Skipped by group setup",
                    (ResultCode::Skip, true) => "Skipped by group cleanup",
                    (ResultCode::Fail, false) => "Failed in group setup",
                    (ResultCode::Fail, true) => "Failed in group cleanup",
                    (_, false) => "Errored in group setup",
                    (_, true) => "Errored in group cleanup",
                };
                (code, reason.to_string())
            }
            (WaitStatus::Signaled(_, signal, _), _) => (
                ResultCode::Error,
                format!("Terminated by signal ({}): {}", signal as i32, signal.as_str()),
            ),
            (other, _) => {
                warn!("unexpected wait status for group {}: {:?}", child, other);
                (ResultCode::Error, "Unexpected wait status".to_string())
            }
        };

        info!("group {} ended as {}: {}", child, code, reason);
        self.reporter.group_failed(code, &reason);
        if self.verbose() || code.shows_output() {
            self.reporter.group_output(capture);
        }

        match ran {
            // Every test already has its result line; only the counts move
            Ok(stats) => Ok(RunStats::uniform(code, stats.total() as usize)),
            Err(_) => {
                for test in self.group.tests() {
                    self.reporter.test_result(test.name(), code, false);
                }
                Ok(RunStats::uniform(code, self.group.len()))
            }
        }
    }

    fn run_child(&self, capture: &CaptureFile, writer: OwnedFd) -> ! {
        if let Err(e) = prepare_child(capture) {
            eprintln!("group setup failed: {:#}", e);
            exit_with(ResultCode::Error);
        }

        let color = self.reporter.color();
        let shared = match self.group.setup() {
            Some(setup) => {
                let ctx = self.group_context(Rc::clone(&self.options.global_ctx), capture);
                match panic::catch_unwind(AssertUnwindSafe(|| setup(&ctx))) {
                    Ok(shared) => shared,
                    Err(_) => exit_with(ResultCode::Error),
                }
            }
            None => Rc::clone(&self.options.global_ctx),
        };

        let executor = TestExecutor {
            shared: Rc::clone(&shared),
            patches: self.group.patches(),
            patcher: self.patcher,
            waiter: self.waiter,
            reporter: Reporter::new(color),
            capture_dir: &self.options.capture_dir,
            verbose: self.verbose(),
        };
        let fail_fast = self.options.flags.contains(RunFlags::FAIL_FAST);

        let mut stats = RunStats::default();
        for test in self.group.tests() {
            let code = executor.run(test);
            stats.record(code);
            if fail_fast && code.is_failure() {
                info!("fail-fast: stopping group after {}", test.name());
                break;
            }
        }

        if let Err(e) = stats.write_to(File::from(writer)) {
            eprintln!("failed to send group stats: {}", e);
            exit_with(ResultCode::Error);
        }

        if let Some(cleanup) = self.group.cleanup() {
            let ctx = self.group_context(shared, capture);
            if panic::catch_unwind(AssertUnwindSafe(|| cleanup(&ctx))).is_err() {
                exit_with(ResultCode::Error);
            }
        }
        exit_with(ResultCode::Ok)
    }

    /// Context for setup and cleanup: its log goes to the group capture.
    fn group_context(&self, shared: SharedContext, capture: &CaptureFile) -> TestContext {
        let log = match capture.try_clone_file() {
            Ok(log) => log,
            Err(e) => {
                eprintln!("failed to open group log: {}", e);
                exit_with(ResultCode::Error)
            }
        };
        TestContext::new(shared, log, self.reporter.color(), self.patcher.originals())
    }
}

fn prepare_child(capture: &CaptureFile) -> Result<()> {
    dup2_stderr(capture.file()).wrap_err("redirect stderr")?;
    reset_termination_handlers().wrap_err("reset signal handlers")?;
    block_termination_signals().wrap_err("block termination signals")?;
    Ok(())
}
