/// The supervision loop: run attempts one after another until the command
/// succeeds, fails for good, or shutdown is requested.
use crate::attempt::{AttemptRunner, Outcome};
use crate::error::SuperviseError;
use tokio_util::sync::CancellationToken;

pub struct Supervisor {
    runner: AttemptRunner,
    shutdown: CancellationToken,
    attempts: u32,
}

impl Supervisor {
    /// `shutdown` is the root token: every attempt's token derives from it,
    /// and it also interrupts the backoff between attempts.
    pub fn new(runner: AttemptRunner, shutdown: CancellationToken) -> Self {
        Self {
            runner,
            shutdown,
            attempts: 0,
        }
    }

    /// Number of attempts started so far.
    #[cfg(test)]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Drive attempts until a terminal outcome.
    ///
    /// Stall kills are followed by the backoff delay and a new attempt. A
    /// shutdown request kills the running attempt, which then takes the same
    /// retryable path and is rejected in the backoff wait.
    pub async fn run(&mut self) -> Result<(), SuperviseError> {
        tracing::debug!(
            command = %self.runner.command(),
            max_attempts = self.runner.policy().max_attempts(),
            "supervisor starting"
        );

        loop {
            self.attempts += 1;
            let attempt = self.attempts;

            match self.runner.run(attempt, &self.shutdown).await {
                Outcome::Success => {
                    tracing::debug!(attempts = attempt, "command completed");
                    return Ok(());
                }
                Outcome::Fatal(e) => return Err(e),
                Outcome::RetryableStall(failure) => {
                    tracing::debug!(attempt, pid = failure.pid, "attempt stalled");
                    let resumed = self
                        .runner
                        .policy()
                        .wait_before_restart(attempt, &self.shutdown)
                        .await;
                    if !resumed {
                        return Err(SuperviseError::BackoffCancelled);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::testing::{capture, sh};
    use crate::attempt::{CommandSpec, OutputSinks};
    use crate::process_group::ProcessGroupKiller;
    use crate::retry::RetryPolicy;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn supervisor(
        command: CommandSpec,
        threshold: Duration,
        backoff: Duration,
        max_attempts: u32,
        sinks: OutputSinks,
    ) -> (Supervisor, CancellationToken) {
        let shutdown = CancellationToken::new();
        let runner = AttemptRunner::new(
            command,
            threshold,
            RetryPolicy::new(max_attempts, backoff),
            sinks,
            Arc::new(ProcessGroupKiller),
        );
        (Supervisor::new(runner, shutdown.clone()), shutdown)
    }

    #[tokio::test]
    async fn test_clean_exit_runs_once() {
        let (sinks, out, _err) = capture();
        let (mut sup, _) = supervisor(
            sh("echo hello"),
            Duration::from_secs(5),
            Duration::from_millis(10),
            3,
            sinks,
        );
        sup.run().await.unwrap();
        assert_eq!(sup.attempts(), 1);
        assert_eq!(out.contents(), "hello\n");
    }

    #[tokio::test]
    async fn test_own_failure_not_retried() {
        let (sinks, _out, _err) = capture();
        let (mut sup, _) = supervisor(
            sh("echo bad arguments >&2; exit 2"),
            Duration::from_secs(5),
            Duration::from_millis(10),
            10,
            sinks,
        );
        let err = sup.run().await.unwrap_err();
        assert!(matches!(err, SuperviseError::Failed(_)));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(sup.attempts(), 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_not_retried() {
        let (sinks, _out, _err) = capture();
        let command = CommandSpec {
            program: "hahahahahaha".to_string(),
            args: vec![],
        };
        let (mut sup, _) = supervisor(
            command,
            Duration::from_secs(5),
            Duration::from_millis(10),
            0,
            sinks,
        );
        let err = sup.run().await.unwrap_err();
        assert!(matches!(err, SuperviseError::Spawn { .. }));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(sup.attempts(), 1);
    }

    #[tokio::test]
    async fn test_stalls_retried_until_exhausted() {
        let (sinks, out, _err) = capture();
        let (mut sup, _) = supervisor(
            sh("echo attempt; sleep 30"),
            Duration::from_millis(200),
            Duration::from_millis(50),
            3,
            sinks,
        );
        let err = sup.run().await.unwrap_err();
        assert!(matches!(
            err,
            SuperviseError::AttemptsExhausted { attempts: 3, .. }
        ));
        assert_eq!(err.exit_code(), 255);
        assert_eq!(sup.attempts(), 3);
        assert_eq!(out.contents(), "attempt\nattempt\nattempt\n");
    }

    #[tokio::test]
    async fn test_backoff_elapses_between_attempts() {
        let (sinks, _out, _err) = capture();
        let (mut sup, _) = supervisor(
            sh("sleep 30"),
            Duration::from_millis(100),
            Duration::from_millis(600),
            2,
            sinks,
        );
        let start = Instant::now();
        sup.run().await.unwrap_err();
        // Two stall windows plus one backoff.
        assert!(start.elapsed() >= Duration::from_millis(700));
        assert_eq!(sup.attempts(), 2);
    }

    #[tokio::test]
    async fn test_recovers_after_stall() {
        // First attempt hangs; the marker file makes the second one exit cleanly.
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran-once");
        let script = format!(
            "if [ -e {0} ]; then echo done; else touch {0}; sleep 30; fi",
            marker.display()
        );
        let (sinks, out, _err) = capture();
        let (mut sup, _) = supervisor(
            sh(&script),
            Duration::from_millis(200),
            Duration::from_millis(50),
            0,
            sinks,
        );
        sup.run().await.unwrap();
        assert_eq!(sup.attempts(), 2);
        assert_eq!(out.contents(), "done\n");
    }

    #[tokio::test]
    async fn test_shutdown_during_attempt_ends_in_backoff() {
        let (sinks, _out, _err) = capture();
        let (mut sup, shutdown) = supervisor(
            sh("sleep 30"),
            Duration::from_secs(60),
            Duration::from_secs(30),
            0,
            sinks,
        );
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            shutdown.cancel();
        });

        let start = Instant::now();
        let err = sup.run().await.unwrap_err();
        assert!(matches!(err, SuperviseError::BackoffCancelled));
        assert_eq!(err.exit_code(), 1);
        assert_eq!(sup.attempts(), 1);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_shutdown_during_backoff() {
        let (sinks, _out, _err) = capture();
        let (mut sup, shutdown) = supervisor(
            sh("sleep 30"),
            Duration::from_millis(100),
            Duration::from_secs(30),
            0,
            sinks,
        );
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_000)).await;
            shutdown.cancel();
        });

        let err = sup.run().await.unwrap_err();
        assert!(matches!(err, SuperviseError::BackoffCancelled));
        assert_eq!(sup.attempts(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_on_last_attempt_reports_exit() {
        let (sinks, _out, _err) = capture();
        let (mut sup, shutdown) = supervisor(
            sh("sleep 30"),
            Duration::from_secs(60),
            Duration::from_secs(30),
            1,
            sinks,
        );
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            shutdown.cancel();
        });

        let err = sup.run().await.unwrap_err();
        assert!(matches!(err, SuperviseError::AttemptsExhausted { .. }));
        assert_eq!(err.exit_code(), 255);
    }
}
