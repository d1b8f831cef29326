//! Exponential backoff used by the streaming update workers between unproductive fetches.
use std::time::Duration;

use tokio::time::Instant;

/// Jitter-free exponential backoff: `min(base * 2^attempts, max_wait)`.
///
/// `Backoff` does not own a timer task. [`Backoff::schedule`] arms a deadline that the owner waits
/// on (see [`Backoff::wait`]), and [`Backoff::reset`] disarms it. This lets the owner drive retries
/// from an explicit loop instead of re-entrant callbacks.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max_wait: Duration,
    attempts: u32,
    deadline: Option<Instant>,
}

impl Backoff {
    /// Default base delay.
    pub const DEFAULT_BASE: Duration = Duration::from_secs(1);
    /// Default maximum delay.
    pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30 * 60);

    /// Create a backoff with the given base delay and cap.
    pub fn new(base: Duration, max_wait: Duration) -> Backoff {
        Backoff {
            base,
            max_wait,
            attempts: 0,
            deadline: None,
        }
    }

    /// Number of calls scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay the next [`Backoff::schedule`] call would use.
    pub fn next_delay(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempts);
        self.base.saturating_mul(factor).min(self.max_wait)
    }

    /// Arm the next call, returning its delay and incrementing the number of attempts.
    ///
    /// Scheduling while a call is pending replaces the pending call.
    pub fn schedule(&mut self) -> Duration {
        let delay = self.next_delay();
        self.attempts += 1;
        self.deadline = Some(Instant::now() + delay);
        delay
    }

    /// Cancel any pending call and zero the attempts. Safe to call repeatedly.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.deadline = None;
    }

    /// Instant at which the pending call is due, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Wait until `deadline`. A `None` deadline (nothing scheduled) never completes.
    pub async fn wait(deadline: Option<Instant>) {
        match deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

impl Default for Backoff {
    fn default() -> Backoff {
        Backoff::new(Backoff::DEFAULT_BASE, Backoff::DEFAULT_MAX_WAIT)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::Backoff;

    #[test]
    fn delay_doubles_until_capped() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));

        let delays: Vec<_> = (0..5).map(|_| backoff.schedule()).collect();

        assert_eq!(
            delays,
            [100, 200, 400, 500, 500].map(Duration::from_millis).to_vec()
        );
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn reset_zeroes_attempts_and_cancels_pending_call() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        backoff.schedule();
        backoff.schedule();
        assert!(backoff.deadline().is_some());

        backoff.reset();
        backoff.reset();

        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.deadline().is_none());
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn large_attempt_counts_do_not_overflow() {
        let mut backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(60));
        for _ in 0..100 {
            backoff.schedule();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_completes_at_deadline() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        backoff.schedule();
        let start = tokio::time::Instant::now();

        Backoff::wait(backoff.deadline()).await;

        assert!(start.elapsed() >= Duration::from_millis(100));
    }
}
