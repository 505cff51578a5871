use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::io::Write;
use tracing::{debug, warn};

use crate::result_code::ResultCode;

/// Forks after flushing stdout and stderr so buffered text is not emitted twice.
///
/// # Safety
/// Same contract as [`nix::unistd::fork`]: the child may only rely on state
/// owned by the calling thread. The framework never starts threads, so the
/// runner, group and test processes all satisfy this.
pub unsafe fn clean_fork() -> nix::Result<ForkResult> {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    fork()
}

/// Terminates the current process with a result code as its exit status.
pub fn exit_with(code: ResultCode) -> ! {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    std::process::exit(code.exit_code())
}

/// Blocks until `child` terminates, skipping stop and continue notifications.
pub fn reap(child: Pid) -> nix::Result<WaitStatus> {
    loop {
        match waitpid(child, None) {
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => return Ok(status),
            Ok(other) => debug!("ignoring wait status {:?} for {}", other, child),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Sends SIGKILL to `child` and reaps it. A child that is already gone is not an error.
pub fn kill_and_reap(child: Pid) {
    match kill(child, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("failed to kill {}: {}", child, e),
    }
    if let Err(e) = reap(child) {
        warn!("failed to reap {}: {}", child, e);
    }
}

/// Leaves after a termination signal, once the child has been reaped.
///
/// The run is being torn down, so no result is reported.
pub fn exit_interrupted() -> ! {
    let _ = std::io::stdout().flush();
    std::process::exit(1)
}
