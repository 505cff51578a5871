//! Stop-and-resume handshake between a test process and its group process.
//!
//! A test that needs patching makes itself traceable and stops before running
//! any test code. The group process waits for that stop, writes the patches
//! and detaches, which lets the test continue.

use super::Result;

use eyre::bail;
use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::{raise, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::process::kill_and_reap;
use crate::signals::termination_pending;
use crate::wait::POLL_INTERVAL;

/// How long a freshly forked test may take to reach its stop.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Test process side: become traceable by the parent, then stop.
///
/// Returns once the parent has detached.
pub fn stop_for_patching() -> nix::Result<()> {
    ptrace::traceme()?;
    raise(Signal::SIGSTOP)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Spawned,
    Stopped,
    Resumed,
}

/// What happened while waiting for the stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The child terminated before stopping and has been reaped.
    Exited(WaitStatus),
    /// A termination signal arrived; the child has been killed and reaped.
    Interrupted,
}

/// Group process side of the handshake for one test process.
#[derive(Debug)]
pub struct StopHandshake {
    child: Pid,
    state: HandshakeState,
    timeout: Duration,
}

impl StopHandshake {
    pub fn new(child: Pid) -> Self {
        Self {
            child,
            state: HandshakeState::Spawned,
            timeout: HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Waits until the child has stopped itself.
    ///
    /// If it does not stop in time it is killed and an error is returned.
    pub fn await_stop(&mut self) -> Result<StopOutcome> {
        if self.state != HandshakeState::Spawned {
            bail!("handshake with {} already past the stop", self.child);
        }
        let deadline = Instant::now() + self.timeout;

        loop {
            if termination_pending() {
                kill_and_reap(self.child);
                return Ok(StopOutcome::Interrupted);
            }

            match waitpid(self.child, Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED)) {
                Ok(WaitStatus::Stopped(_, Signal::SIGSTOP)) => {
                    debug!("test process {} stopped for patching", self.child);
                    self.state = HandshakeState::Stopped;
                    return Ok(StopOutcome::Stopped);
                }
                Ok(WaitStatus::Stopped(_, other)) => {
                    // Pass on anything the child received before its own stop
                    debug!("forwarding {} to {}", other, self.child);
                    if let Err(e) = ptrace::cont(self.child, Some(other)) {
                        kill_and_reap(self.child);
                        bail!("failed to continue {}: {}", self.child, e);
                    }
                }
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    warn!("test process {} ended before stopping: {:?}", self.child, status);
                    return Ok(StopOutcome::Exited(status));
                }
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => {
                    kill_and_reap(self.child);
                    bail!("failed to wait for {} to stop: {}", self.child, e);
                }
            }

            if Instant::now() >= deadline {
                kill_and_reap(self.child);
                bail!("test process {} did not stop within {:?}", self.child, self.timeout);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Detaches from the stopped child, letting it run.
    pub fn resume(&mut self) -> Result<()> {
        if self.state != HandshakeState::Stopped {
            bail!("cannot resume {} before it has stopped", self.child);
        }
        if let Err(e) = ptrace::detach(self.child, None) {
            kill_and_reap(self.child);
            bail!("failed to resume {}: {}", self.child, e);
        }
        self.state = HandshakeState::Resumed;
        Ok(())
    }
}
