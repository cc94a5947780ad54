/// Pass-through writers that remember when they were last written to.
///
/// Each output stream of the supervised command gets its own tracker. The
/// stall monitor only ever reads the timestamps, so it never contends with
/// the writers.
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// Current wall-clock time as Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Unix-millisecond time of the most recent write to a stream.
///
/// Clones share the same underlying value. Updates never move it backwards,
/// even if the wall clock does.
#[derive(Debug, Clone, Default)]
pub struct ActivityTimestamp {
    last_millis: Arc<AtomicI64>,
}

impl ActivityTimestamp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity at the current time.
    pub fn touch(&self) {
        self.record(now_millis());
    }

    fn record(&self, millis: i64) {
        self.last_millis.fetch_max(millis, Ordering::Relaxed);
    }

    /// Last recorded activity, or 0 if none was ever recorded.
    pub fn last_millis(&self) -> i64 {
        self.last_millis.load(Ordering::Relaxed)
    }
}

/// Writer adapter that stamps an [`ActivityTimestamp`] on every write and then
/// forwards the bytes to the wrapped sink untouched.
#[derive(Debug)]
pub struct ActivityTracker<W> {
    inner: W,
    activity: ActivityTimestamp,
}

impl<W> ActivityTracker<W> {
    /// Wrap `inner`. With `start_now` the timestamp is seeded to the current
    /// time, so a stream that has not written anything yet does not look
    /// stalled from the very first check.
    pub fn new(inner: W, start_now: bool) -> Self {
        let activity = ActivityTimestamp::new();
        if start_now {
            activity.touch();
        }
        Self { inner, activity }
    }

    /// Handle to this tracker's timestamp, for the stall monitor.
    pub fn activity(&self) -> ActivityTimestamp {
        self.activity.clone()
    }

    #[cfg(test)]
    pub fn last_millis(&self) -> i64 {
        self.activity.last_millis()
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for ActivityTracker<W> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.activity.touch();
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
