use crate::duration::format_duration;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How an attempt's exit should be treated, decided once at process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    /// Clean exit: the run is over.
    Success,
    /// Failed on the last allowed attempt: give up with the child's status.
    Exhausted,
    /// Killed through the attempt's cancellation (stall or shutdown): restart.
    Stalled,
    /// Failed on its own: never retried.
    Failed,
}

/// Attempt limit and restart delay for a supervision run.
///
/// A `max_attempts` of 0 means attempts are unbounded. Only stall kills are
/// retried; a command that fails on its own is not considered transient.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `attempt` (1-based) is the last one allowed.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }

    /// Classify the exit of attempt number `attempt`.
    ///
    /// The attempt limit is checked before the cancellation state, so a stall
    /// kill on the final attempt is reported as exhausted rather than retried.
    pub fn classify(&self, attempt: u32, success: bool, cancelled: bool) -> ExitClass {
        if success {
            ExitClass::Success
        } else if self.is_exhausted(attempt) {
            ExitClass::Exhausted
        } else if cancelled {
            ExitClass::Stalled
        } else {
            ExitClass::Failed
        }
    }

    /// Sleep for the backoff before restart number `attempt`.
    ///
    /// Returns `false` if `shutdown` was cancelled before the delay elapsed.
    pub async fn wait_before_restart(&self, attempt: u32, shutdown: &CancellationToken) -> bool {
        tracing::info!(
            attempt,
            "waiting {} for restart #{}...",
            format_duration(self.backoff),
            attempt
        );
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.backoff) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_success_always_wins() {
        let policy = RetryPolicy::new(1, Duration::ZERO);
        assert_eq!(policy.classify(1, true, true), ExitClass::Success);
        assert_eq!(policy.classify(5, true, false), ExitClass::Success);
    }

    #[test]
    fn test_stall_retried_while_attempts_remain() {
        let policy = RetryPolicy::new(3, Duration::ZERO);
        assert_eq!(policy.classify(1, false, true), ExitClass::Stalled);
        assert_eq!(policy.classify(2, false, true), ExitClass::Stalled);
        assert_eq!(policy.classify(3, false, true), ExitClass::Exhausted);
    }

    #[test]
    fn test_own_failure_never_retried() {
        let policy = RetryPolicy::new(10, Duration::ZERO);
        assert_eq!(policy.classify(1, false, false), ExitClass::Failed);
    }

    #[test]
    fn test_own_failure_on_last_attempt_is_exhausted() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        assert_eq!(policy.classify(2, false, false), ExitClass::Exhausted);
    }

    #[test]
    fn test_zero_max_attempts_is_unbounded() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert!(!policy.is_exhausted(1));
        assert!(!policy.is_exhausted(10_000));
        assert_eq!(policy.classify(10_000, false, true), ExitClass::Stalled);
    }

    #[test]
    fn test_single_attempt_never_retries() {
        let policy = RetryPolicy::new(1, Duration::ZERO);
        assert!(policy.is_exhausted(1));
        assert_eq!(policy.classify(1, false, true), ExitClass::Exhausted);
    }

    #[tokio::test]
    async fn test_backoff_elapses() {
        let policy = RetryPolicy::new(0, Duration::from_millis(150));
        let token = CancellationToken::new();
        let start = Instant::now();
        assert!(policy.wait_before_restart(1, &token).await);
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_backoff_interrupted_by_shutdown() {
        let policy = RetryPolicy::new(0, Duration::from_secs(30));
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        assert!(!policy.wait_before_restart(1, &token).await);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_backoff_already_cancelled_returns_immediately() {
        let policy = RetryPolicy::new(0, Duration::from_secs(30));
        let token = CancellationToken::new();
        token.cancel();
        assert!(!policy.wait_before_restart(1, &token).await);
    }
}
