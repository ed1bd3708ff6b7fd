//! Tick Watchdog
//!
//! Detects a session that is still open but has stopped delivering prices.

use std::time::Duration;

use tokio::time::Instant;

/// Default silence tolerated before a session is considered degraded.
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(30);

/// Tracks time since the last tick on the current session.
#[derive(Debug)]
pub struct TickWatchdog {
    timeout: Duration,
    last_tick: Instant,
}

impl TickWatchdog {
    /// Create a watchdog. A zero timeout disables it.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_tick: Instant::now(),
        }
    }

    /// Record a tick.
    pub fn record_tick(&mut self) {
        self.last_tick = Instant::now();
    }

    /// Restart the silence window, e.g. for a new session.
    pub fn reset(&mut self) {
        self.last_tick = Instant::now();
    }

    /// Time since the last tick or reset.
    #[must_use]
    pub fn silence(&self) -> Duration {
        self.last_tick.elapsed()
    }

    /// Configured timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Completes once the silence window has been exceeded. Never completes
    /// when disabled.
    pub async fn expired(&self) {
        if self.timeout.is_zero() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep_until(self.last_tick + self.timeout).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test(start_paused = true)]
    async fn expires_after_silence() {
        let watchdog = TickWatchdog::new(Duration::from_secs(30));
        let mut expired = task::spawn(watchdog.expired());

        assert_pending!(expired.poll());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_ready!(expired.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_push_the_deadline_out() {
        let mut watchdog = TickWatchdog::new(Duration::from_secs(30));
        tokio::time::advance(Duration::from_secs(20)).await;
        watchdog.record_tick();
        tokio::time::advance(Duration::from_secs(20)).await;

        let mut expired = task::spawn(watchdog.expired());
        assert_pending!(expired.poll());
        assert_eq!(watchdog.silence(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_never_fires() {
        let watchdog = TickWatchdog::new(Duration::ZERO);
        let mut expired = task::spawn(watchdog.expired());

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_pending!(expired.poll());
    }
}
