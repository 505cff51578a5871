use super::Result;

use nix::sys::signal::{
    pthread_sigmask, sigaction, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};
use once_cell::sync::OnceCell;
use tracing::debug;

/// Signals that tear the whole run down.
pub const TERMINATION_SIGNALS: [Signal; 4] =
    [Signal::SIGHUP, Signal::SIGINT, Signal::SIGQUIT, Signal::SIGTERM];

static HANDLERS_INSTALLED: OnceCell<()> = OnceCell::new();

pub fn termination_set() -> SigSet {
    let mut set = SigSet::empty();
    for signal in TERMINATION_SIGNALS {
        set.add(signal);
    }
    set
}

/// Forwards the signal to our process group, reaps every child and exits.
///
/// Only async-signal-safe calls are made here.
extern "C" fn forward_termination(signum: libc::c_int) {
    unsafe {
        libc::kill(0, signum);
        while libc::waitpid(-1, std::ptr::null_mut(), 0) > 0 {}
        libc::_exit(1);
    }
}

/// Installs the runner's termination handlers. Calling it again is a no-op.
pub fn install_termination_handlers() -> Result<()> {
    HANDLERS_INSTALLED.get_or_try_init(|| -> Result<()> {
        let action = SigAction::new(
            SigHandler::Handler(forward_termination),
            SaFlags::empty(),
            SigSet::all(),
        );
        for signal in TERMINATION_SIGNALS {
            unsafe { sigaction(signal, &action) }?;
        }
        debug!("termination handlers installed");
        Ok(())
    })?;
    Ok(())
}

/// Restores default dispositions in a forked group process so it never runs
/// the runner's teardown logic.
pub fn reset_termination_handlers() -> nix::Result<()> {
    let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    for signal in TERMINATION_SIGNALS {
        unsafe { sigaction(signal, &action) }?;
    }
    Ok(())
}

/// Keeps termination signals pending so a waiter can notice them and clean up
/// its child instead of dying underneath it.
pub fn block_termination_signals() -> nix::Result<()> {
    pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&termination_set()), None)
}

/// Reset signal mask to default state so a test sees signals normally.
pub fn unblock_all_signals() -> nix::Result<()> {
    let empty_mask = SigSet::empty();
    pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&empty_mask), None)
}

/// True when a blocked termination signal is waiting for this process.
pub fn termination_pending() -> bool {
    unsafe {
        let mut pending: libc::sigset_t = std::mem::zeroed();
        if libc::sigpending(&mut pending) != 0 {
            return false;
        }
        TERMINATION_SIGNALS
            .iter()
            .any(|signal| libc::sigismember(&pending, *signal as libc::c_int) == 1)
    }
}
