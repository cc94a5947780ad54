/// Output-silence monitor for a running attempt.
///
/// Runs alongside the child process, periodically checking when stdout or
/// stderr was last written. If neither stream has been written for longer than
/// the stall threshold, the attempt's cancellation token is triggered, which
/// kills the child's process group.
use crate::duration::format_duration;
use crate::tracker::{now_millis, ActivityTimestamp};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Upper bound on the check interval; short thresholds check more often.
const MAX_CHECK_INTERVAL: Duration = Duration::from_secs(1);

pub struct StallMonitor {
    stall_threshold: Duration,
    stdout: ActivityTimestamp,
    stderr: ActivityTimestamp,
    pid: u32,
}

impl StallMonitor {
    pub fn new(
        stall_threshold: Duration,
        stdout: ActivityTimestamp,
        stderr: ActivityTimestamp,
        pid: u32,
    ) -> Self {
        Self {
            stall_threshold,
            stdout,
            stderr,
            pid,
        }
    }

    /// `min(1s, stall_threshold)`, never zero.
    pub fn check_interval(&self) -> Duration {
        self.stall_threshold
            .min(MAX_CHECK_INTERVAL)
            .max(Duration::from_millis(1))
    }

    /// Time since the most recent write on either stream.
    pub fn silence(&self) -> Duration {
        silence_since(
            now_millis(),
            self.stdout.last_millis().max(self.stderr.last_millis()),
        )
    }

    /// Start checking on a background task.
    ///
    /// Every time the silence exceeds the threshold, `kill` is cancelled
    /// (repeat cancellations are no-ops). The task keeps ticking until `stop`
    /// is cancelled.
    pub fn spawn(self, stop: CancellationToken, kill: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(stop, kill))
    }

    pub async fn run(self, stop: CancellationToken, kill: CancellationToken) {
        let period = self.check_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                _ = ticker.tick() => {
                    let silence = self.silence();
                    tracing::trace!(pid = self.pid, silence_ms = silence.as_millis() as u64, "stall check");
                    if silence > self.stall_threshold {
                        tracing::error!(
                            pid = self.pid,
                            "last output was {} ago, killing {}",
                            format_duration(truncate_to_secs(silence)),
                            self.pid
                        );
                        kill.cancel();
                    }
                }
            }
        }
    }
}

fn silence_since(now_millis: i64, last_millis: i64) -> Duration {
    Duration::from_millis(now_millis.saturating_sub(last_millis).max(0) as u64)
}

fn truncate_to_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}
