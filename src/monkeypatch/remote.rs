use nix::sys::ptrace::{self, AddressType};
use nix::unistd::Pid;

use super::PatchError;

/// Stores one pointer-sized word into a stopped tracee and reads it back.
pub(super) fn write_word(pid: Pid, address: usize, value: usize) -> Result<(), PatchError> {
    let remote_error = |source: nix::Error| PatchError::RemoteWrite {
        pid,
        address,
        source,
    };

    ptrace::write(pid, address as AddressType, value as libc::c_long).map_err(remote_error)?;

    let found = ptrace::read(pid, address as AddressType).map_err(remote_error)? as usize;
    if found != value {
        return Err(PatchError::Verification {
            pid,
            address,
            found,
        });
    }
    Ok(())
}
