//! Everything the runner prints on stdout.

use nix::sys::signal::Signal;
use std::io::{self, Write};

use crate::capture::{CaptureFile, TestCaptures};
use crate::result_code::ResultCode;
use crate::stats::RunStats;

pub const GREEN: &str = "\x1b[0;32m";
pub const YELLOW: &str = "\x1b[0;33m";
pub const RED: &str = "\x1b[0;31m";
pub const RESET_COLOR: &str = "\x1b[0m";

const RULE: &str = "------------------------";

/// Writes result lines and captured output, optionally in colour.
#[derive(Debug, Clone, Copy)]
pub struct Reporter {
    color: bool,
}

impl Reporter {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn color(&self) -> bool {
        self.color
    }

    fn paint(&self, code: ResultCode) -> (&'static str, &'static str) {
        if !self.color {
            return ("", "");
        }
        let start = match code {
            ResultCode::Ok => GREEN,
            ResultCode::Skip => YELLOW,
            ResultCode::Fail | ResultCode::Error => RED,
        };
        (start, RESET_COLOR)
    }

    pub fn test_result(&self, name: &str, code: ResultCode, xfail: bool) {
        let (start, end) = self.paint(code);
        println!("Test result ({}): {}{}{}", name, start, code.label(xfail), end);
    }

    pub fn test_timed_out(&self, name: &str) {
        let (start, end) = self.paint(ResultCode::Fail);
        println!("Test result ({}): {}FAILED{}: Timed out", name, start, end);
    }

    pub fn test_signaled(&self, name: &str, signal: Signal) {
        let (start, end) = self.paint(ResultCode::Error);
        println!(
            "Test result ({}): {}ERROR{}: Terminated by signal ({}): {}",
            name,
            start,
            end,
            signal as i32,
            signal.as_str()
        );
    }

    pub fn test_error(&self, name: &str, reason: &str) {
        let (start, end) = self.paint(ResultCode::Error);
        println!("Test result ({}): {}ERROR{}: {}", name, start, end, reason);
    }

    /// Dumps the log, then labelled stdout and stderr, skipping empty streams.
    pub fn captured_output(&self, captures: &TestCaptures) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        let mut some_output = false;

        if captures.log.has_data() {
            let _ = captures.log.dump(&mut out, self.color);
            some_output = true;
        }
        for (label, capture) in [("stdout", &captures.stdout), ("stderr", &captures.stderr)] {
            if self.labelled_block(&mut out, label, capture) {
                some_output = true;
            }
        }
        if some_output {
            let _ = writeln!(out);
        }
        let _ = out.flush();
    }

    /// Dumps what a group's setup and cleanup wrote.
    pub fn group_output(&self, capture: &CaptureFile) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if self.labelled_block(&mut out, "group", capture) {
            let _ = writeln!(out);
        }
        let _ = out.flush();
    }

    fn labelled_block(&self, out: &mut impl Write, label: &str, capture: &CaptureFile) -> bool {
        if !capture.has_data() {
            return false;
        }
        let _ = writeln!(out, "\n-------- {} --------", label);
        let _ = capture.dump(out, self.color);
        let _ = writeln!(out, "\n{}", RULE);
        true
    }

    pub fn group_failed(&self, code: ResultCode, reason: &str) {
        let (start, end) = self.paint(code);
        println!("Group result: {}{}{}: {}", start, code, end, reason);
    }

    pub fn summary(&self, stats: &RunStats) {
        println!("\n\nTests run: {}", stats.total());
        println!("Passed: {}", stats.passed);
        println!("Skipped: {}", stats.skipped);
        println!("Failed: {}", stats.failed);
        println!("Errored: {}", stats.errored);
        let _ = io::stdout().flush();
    }
}
