/// Terminal errors of a supervision run and their exit codes.
use crate::config::ConfigError;
use std::process::ExitStatus;

/// Exit code used when the final process has no code of its own (it was
/// killed by a signal).
pub const SIGNALED_EXIT_CODE: i32 = 255;

/// Exit code for every failure that is not the child's own.
pub const SUPERVISOR_EXIT_CODE: i32 = 1;

/// A non-successful exit of the supervised command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitFailure {
    pub pid: u32,
    pub status: ExitStatus,
}

impl ExitFailure {
    /// The child's exit code, or [`SIGNALED_EXIT_CODE`] if it was signaled.
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(SIGNALED_EXIT_CODE)
    }
}

impl std::fmt::Display for ExitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.status)
    }
}

/// Errors that end a supervision run.
#[derive(Debug)]
pub enum SuperviseError {
    /// Missing command or invalid option values.
    Usage(String),
    /// Config file could not be loaded or failed validation.
    Config(ConfigError),
    /// The command could not be started at all.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// Waiting on the running command failed.
    Wait { pid: u32, source: std::io::Error },
    /// The command exited unsuccessfully on its own.
    Failed(ExitFailure),
    /// The final allowed attempt failed after a stall kill.
    AttemptsExhausted { attempts: u32, last: ExitFailure },
    /// Shutdown was requested while waiting to restart.
    BackoffCancelled,
    /// SIGINT/SIGTERM handlers could not be installed.
    Signals(std::io::Error),
}

impl SuperviseError {
    /// Process exit code for this error: the child's own code when the error
    /// carries a process exit, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            SuperviseError::Failed(failure) => failure.exit_code(),
            SuperviseError::AttemptsExhausted { last, .. } => last.exit_code(),
            _ => SUPERVISOR_EXIT_CODE,
        }
    }
}

impl std::fmt::Display for SuperviseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuperviseError::Usage(msg) => write!(f, "{msg}"),
            SuperviseError::Config(e) => write!(f, "{e}"),
            SuperviseError::Spawn { program, source } => {
                if source.kind() == std::io::ErrorKind::NotFound {
                    write!(f, "failed to start {program}: executable file not found in $PATH")
                } else {
                    write!(f, "failed to start {program}: {source}")
                }
            }
            SuperviseError::Wait { pid, source } => {
                write!(f, "failed waiting for {pid}: {source}")
            }
            SuperviseError::Failed(failure) => write!(f, "{failure}"),
            SuperviseError::AttemptsExhausted { attempts, last } => {
                write!(f, "{last} (giving up after {attempts} attempts)")
            }
            SuperviseError::BackoffCancelled => write!(f, "sleep cancelled: shutdown requested"),
            SuperviseError::Signals(e) => write!(f, "failed to install signal handlers: {e}"),
        }
    }
}

impl std::error::Error for SuperviseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SuperviseError::Config(e) => Some(e),
            SuperviseError::Spawn { source, .. } => Some(source),
            SuperviseError::Wait { source, .. } => Some(source),
            SuperviseError::Signals(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for SuperviseError {
    fn from(e: ConfigError) -> Self {
        SuperviseError::Config(e)
    }
}
