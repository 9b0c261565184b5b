//! Process-group signalling shared by the install runner and the dev-server
//! supervisor. Both spawn their children as group leaders.

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;

/// Send `signal` to the process group led by `pid`. A group that is already
/// gone is not an error.
pub(crate) fn signal_group(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) => tracing::debug!(pid, %signal, "signalled process group"),
        Err(Errno::ESRCH) => tracing::debug!(pid, %signal, "process group already gone"),
        Err(e) => tracing::warn!(pid, %signal, error = %e, "failed to signal process group"),
    }
}
