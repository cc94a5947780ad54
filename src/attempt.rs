/// Single attempt lifecycle: spawn the command in its own process group, pass
/// its output through activity trackers, watch for stalls, and classify how it
/// exited.
use crate::duration::format_duration;
use crate::error::{ExitFailure, SuperviseError};
use crate::process_group::{self, ProcessKiller};
use crate::retry::{ExitClass, RetryPolicy};
use crate::tracker::ActivityTracker;
use crate::watchdog::StallMonitor;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The command line being supervised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Split `argv` into program and arguments. `None` if `argv` is empty.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

pub type Sink = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens a fresh sink for one attempt's output stream.
pub type SinkFactory = Arc<dyn Fn() -> Sink + Send + Sync>;

/// Where the command's stdout and stderr are forwarded to.
#[derive(Clone)]
pub struct OutputSinks {
    stdout: SinkFactory,
    stderr: SinkFactory,
}

impl OutputSinks {
    pub fn new(stdout: SinkFactory, stderr: SinkFactory) -> Self {
        Self { stdout, stderr }
    }

    /// The supervisor's own stdout and stderr.
    pub fn stdio() -> Self {
        Self::new(
            Arc::new(|| Box::new(tokio::io::stdout()) as Sink),
            Arc::new(|| Box::new(tokio::io::stderr()) as Sink),
        )
    }
}

/// How an attempt ended.
#[derive(Debug)]
pub enum Outcome {
    Success,
    /// The run must end with this error.
    Fatal(SuperviseError),
    /// The command was killed through the attempt's cancellation and may be
    /// restarted.
    RetryableStall(ExitFailure),
}

pub struct AttemptRunner {
    command: CommandSpec,
    stall_threshold: Duration,
    policy: RetryPolicy,
    sinks: OutputSinks,
    killer: Arc<dyn ProcessKiller>,
}

impl AttemptRunner {
    pub fn new(
        command: CommandSpec,
        stall_threshold: Duration,
        policy: RetryPolicy,
        sinks: OutputSinks,
        killer: Arc<dyn ProcessKiller>,
    ) -> Self {
        Self {
            command,
            stall_threshold,
            policy,
            sinks,
            killer,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn command(&self) -> &CommandSpec {
        &self.command
    }

    /// Run attempt number `attempt` (1-based) to completion.
    ///
    /// The attempt's cancellation token is a child of `root`: cancelling
    /// `root`, or a stall detected by the monitor, kills the command's whole
    /// process group. The monitor task is stopped and joined before the exit
    /// is classified.
    pub async fn run(&self, attempt: u32, root: &CancellationToken) -> Outcome {
        let cancel = root.child_token();

        tracing::debug!(
            attempt,
            "running {} with max stall time {}",
            self.command,
            format_duration(self.stall_threshold)
        );

        let spawned = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0) // New process group for clean kill
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                return Outcome::Fatal(SuperviseError::Spawn {
                    program: self.command.program.clone(),
                    source: e,
                })
            }
        };

        let Some(pid) = child.id() else {
            return Outcome::Fatal(SuperviseError::Spawn {
                program: self.command.program.clone(),
                source: std::io::Error::other("process exited before its pid could be read"),
            });
        };
        // Resolved while the leader is unreaped; its pid may be reused later.
        let pgid = process_group::group_of(pid).unwrap_or_else(|e| {
            tracing::warn!(pid, error = %e, "falling back to pid as process group");
            pid as i32
        });
        tracing::info!(pid, pgid, attempt, "command started");

        let stdout = ActivityTracker::new((self.sinks.stdout)(), true);
        let stderr = ActivityTracker::new((self.sinks.stderr)(), true);
        let monitor = StallMonitor::new(
            self.stall_threshold,
            stdout.activity(),
            stderr.activity(),
            pid,
        );
        let stdout_pump = pump(child.stdout.take(), stdout, "stdout");
        let stderr_pump = pump(child.stderr.take(), stderr, "stderr");

        let monitor_stop = CancellationToken::new();
        let monitor_task = monitor.spawn(monitor_stop.clone(), cancel.clone());

        // Exit only counts once both pipes are drained.
        let wait = async move {
            let status = child.wait().await;
            let _ = stdout_pump.await;
            let _ = stderr_pump.await;
            status
        };
        tokio::pin!(wait);

        let status = tokio::select! {
            status = &mut wait => status,
            _ = cancel.cancelled() => {
                if let Err(e) = self.killer.kill_group(pgid) {
                    tracing::warn!(pid, pgid, error = %e, "failed to kill process group");
                }
                wait.await
            }
        };

        monitor_stop.cancel();
        if let Err(e) = monitor_task.await {
            tracing::warn!(pid, error = %e, "stall monitor task failed");
        }

        let status = match status {
            Ok(status) => status,
            Err(e) => return Outcome::Fatal(SuperviseError::Wait { pid, source: e }),
        };

        let cancelled = cancel.is_cancelled();
        let class = self.policy.classify(attempt, status.success(), cancelled);
        if class == ExitClass::Success {
            tracing::debug!("{pid} exits");
        } else {
            tracing::info!("{pid} exits: {status}");
        }

        let failure = ExitFailure { pid, status };
        match class {
            ExitClass::Success => Outcome::Success,
            ExitClass::Exhausted if cancelled => {
                Outcome::Fatal(SuperviseError::AttemptsExhausted {
                    attempts: attempt,
                    last: failure,
                })
            }
            ExitClass::Exhausted | ExitClass::Failed => {
                Outcome::Fatal(SuperviseError::Failed(failure))
            }
            ExitClass::Stalled => Outcome::RetryableStall(failure),
        }
    }
}

/// Copy one of the child's output pipes into its tracked sink.
fn pump<R>(reader: Option<R>, mut tracker: ActivityTracker<Sink>, stream: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut reader) = reader else {
            return;
        };
        if let Err(e) = tokio::io::copy(&mut reader, &mut tracker).await {
            tracing::warn!(stream, error = %e, "output passthrough failed");
        }
        if let Err(e) = tracker.flush().await {
            tracing::warn!(stream, error = %e, "failed to flush output");
        }
    })
}
