/// Forced termination of a supervised command together with everything it
/// spawned.
///
/// The command is started as the leader of its own process group, so sending
/// SIGKILL to the negated group id reaches its children and grandchildren too.
/// The group id is looked up once, right after spawn, while the leader is
/// still unreaped; by kill time the leader's pid may already belong to an
/// unrelated process.
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::{self, Pid};

/// Errors from group lookup or a forced termination. These are logged, never
/// fatal: the wait on the child still decides how the attempt ends.
#[derive(Debug)]
pub enum KillError {
    /// The process group of `pid` could not be looked up.
    Resolve { pid: u32, source: Errno },
    /// Delivering the signal to the group failed.
    Signal { pgid: i32, source: Errno },
    /// The group is init's or our own; signalling it would hit the supervisor.
    Refused { pgid: i32 },
}

impl std::fmt::Display for KillError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillError::Resolve { pid, source } => {
                write!(f, "error getting pgid of {pid}: {source}")
            }
            KillError::Signal { pgid, source } => {
                write!(f, "error killing pgid {}: {source}", -pgid)
            }
            KillError::Refused { pgid } => {
                write!(f, "refusing to kill pgid {pgid}: not the command's own group")
            }
        }
    }
}

impl std::error::Error for KillError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KillError::Resolve { source, .. } => Some(source),
            KillError::Signal { source, .. } => Some(source),
            KillError::Refused { .. } => None,
        }
    }
}

/// Look up the process group of a freshly spawned, not yet reaped child.
///
/// `ESRCH` falls back to `pid` itself: the child was spawned with
/// `process_group(0)`, so its group id equals its pid.
pub fn group_of(pid: u32) -> Result<i32, KillError> {
    match unistd::getpgid(Some(Pid::from_raw(pid as i32))) {
        Ok(pgid) => Ok(pgid.as_raw()),
        Err(Errno::ESRCH) => Ok(pid as i32),
        Err(e) => Err(KillError::Resolve { pid, source: e }),
    }
}

/// Terminates every process in a process group.
pub trait ProcessKiller: Send + Sync {
    fn kill_group(&self, pgid: i32) -> Result<(), KillError>;
}

/// POSIX backend: SIGKILL to the whole process group.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessGroupKiller;

impl ProcessKiller for ProcessGroupKiller {
    fn kill_group(&self, pgid: i32) -> Result<(), KillError> {
        if pgid <= 1 || pgid == unistd::getpgrp().as_raw() {
            return Err(KillError::Refused { pgid });
        }

        tracing::debug!(pgid, "sending SIGKILL to process group");
        match signal::kill(Pid::from_raw(-pgid), Signal::SIGKILL) {
            // Group already empty.
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(KillError::Signal { pgid, source: e }),
        }
    }
}
