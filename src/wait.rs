//! Waiting on a child with a deadline while watching for termination signals.
//!
//! Two strategies sit behind [`ProcessWaiter`]. On Linux kernels with
//! `pidfd_open` the waiter polls a process descriptor, a signal descriptor and
//! the deadline in one call. Everywhere else it falls back to a short sleep
//! loop around a non-blocking `waitpid`. [`detect_waiter`] picks one per run.

use super::Result;

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::process::{kill_and_reap, reap};
use crate::signals::termination_pending;

/// Interval between checks in the polling strategy.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a wait ended. Except for `Exited`, the child has already been killed
/// and reaped when this is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The child terminated on its own.
    Exited(WaitStatus),
    /// The deadline passed first.
    TimedOut,
    /// A termination signal arrived for this process.
    Interrupted,
}

pub trait ProcessWaiter {
    /// Waits for `child` to terminate, for at most `timeout` when given.
    fn wait(&self, child: Pid, timeout: Option<Duration>) -> Result<WaitOutcome>;

    fn name(&self) -> &'static str;
}

/// Picks the best strategy this kernel supports.
pub fn detect_waiter() -> Box<dyn ProcessWaiter> {
    #[cfg(target_os = "linux")]
    {
        if pidfd::supported() {
            debug!("using pidfd wait strategy");
            return Box::new(PidfdWaiter);
        }
        info!("pidfd_open unavailable, falling back to polling");
    }
    Box::new(PollingWaiter)
}

fn deadline_from(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|timeout| Instant::now() + timeout)
}

/// Portable strategy: non-blocking `waitpid` every [`POLL_INTERVAL`].
#[derive(Debug, Default, Clone, Copy)]
pub struct PollingWaiter;

impl ProcessWaiter for PollingWaiter {
    fn wait(&self, child: Pid, timeout: Option<Duration>) -> Result<WaitOutcome> {
        let deadline = deadline_from(timeout);

        loop {
            if termination_pending() {
                warn!("termination requested while waiting on {}", child);
                kill_and_reap(child);
                return Ok(WaitOutcome::Interrupted);
            }

            match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    return Ok(WaitOutcome::Exited(status));
                }
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => {
                    kill_and_reap(child);
                    return Err(e.into());
                }
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                info!("child {} exceeded its timeout", child);
                kill_and_reap(child);
                return Ok(WaitOutcome::TimedOut);
            }

            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn name(&self) -> &'static str {
        "polling"
    }
}

#[cfg(target_os = "linux")]
pub use pidfd::PidfdWaiter;

#[cfg(target_os = "linux")]
mod pidfd {
    use super::*;

    use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
    use nix::sys::signalfd::SignalFd;
    use std::os::fd::{AsFd, FromRawFd, OwnedFd, RawFd};

    use crate::signals::termination_set;

    pub(super) fn pidfd_open(pid: Pid) -> nix::Result<OwnedFd> {
        let fd = unsafe { libc::syscall(libc::SYS_pidfd_open, pid.as_raw(), 0) };
        Errno::result(fd).map(|fd| unsafe { OwnedFd::from_raw_fd(fd as RawFd) })
    }

    pub(super) fn supported() -> bool {
        pidfd_open(Pid::this()).is_ok()
    }

    /// Milliseconds to hand to `poll`, clamped to what one call accepts here.
    /// Rounds up so a sub-millisecond remainder does not turn into a busy loop.
    fn poll_millis(remaining: Duration) -> u16 {
        let millis = remaining.as_micros().div_ceil(1000);
        millis.min(u128::from(u16::MAX)) as u16
    }

    fn readable(fd: &PollFd<'_>) -> bool {
        fd.revents()
            .is_some_and(|events| events.intersects(PollFlags::POLLIN | PollFlags::POLLHUP))
    }

    /// Linux strategy: one `poll` over a pidfd, a signalfd and the deadline.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct PidfdWaiter;

    impl ProcessWaiter for PidfdWaiter {
        fn wait(&self, child: Pid, timeout: Option<Duration>) -> Result<WaitOutcome> {
            let deadline = deadline_from(timeout);

            let process = match pidfd_open(child) {
                Ok(fd) => fd,
                Err(e) => {
                    kill_and_reap(child);
                    return Err(e.into());
                }
            };
            let signals = match SignalFd::new(&termination_set()) {
                Ok(fd) => fd,
                Err(e) => {
                    kill_and_reap(child);
                    return Err(e.into());
                }
            };

            loop {
                let remaining =
                    deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
                if remaining == Some(Duration::ZERO) {
                    info!("child {} exceeded its timeout", child);
                    kill_and_reap(child);
                    return Ok(WaitOutcome::TimedOut);
                }

                let mut fds = [
                    PollFd::new(process.as_fd(), PollFlags::POLLIN),
                    PollFd::new(signals.as_fd(), PollFlags::POLLIN),
                ];
                let timeout = remaining.map_or(PollTimeout::NONE, |r| PollTimeout::from(poll_millis(r)));
                match poll(&mut fds, timeout) {
                    Ok(0) | Err(Errno::EINTR) => continue,
                    Ok(_) => {}
                    Err(e) => {
                        kill_and_reap(child);
                        return Err(e.into());
                    }
                }

                if readable(&fds[1]) {
                    warn!("termination requested while waiting on {}", child);
                    kill_and_reap(child);
                    return Ok(WaitOutcome::Interrupted);
                }
                if readable(&fds[0]) {
                    return Ok(WaitOutcome::Exited(reap(child)?));
                }
            }
        }

        fn name(&self) -> &'static str {
            "pidfd"
        }
    }

}
