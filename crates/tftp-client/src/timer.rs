//! Retransmission timer.
//!
//! A transfer keeps exactly one timer armed from the first read request
//! until completion. Every expiry without intervening progress doubles the
//! backoff; once doubling would pass the cap the expiry carries a failure
//! indicator and the engine decides whether that is terminal (plain TFTP)
//! or a recovery trigger (MTFTP).

use std::future::pending;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Adjustable retry timing.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Backoff after the first expiry, and again after any progress.
    pub min_timeout: Duration,
    /// Backoff ceiling; doubling past this point reports failure.
    pub max_timeout: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            min_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(10),
        }
    }
}

/// A single-shot, reschedulable retransmission timer.
#[derive(Debug)]
pub struct RetryTimer {
    config: TimerConfig,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl RetryTimer {
    /// Creates a stopped timer.
    pub fn new(config: TimerConfig) -> Self {
        let timeout = config.min_timeout;
        Self {
            config,
            timeout,
            deadline: None,
        }
    }

    /// Arms the timer to fire after the current backoff.
    pub fn start(&mut self) {
        self.deadline = Some(Instant::now() + self.timeout);
    }

    /// Arms the timer to fire on the next pass through the event loop.
    pub fn start_nodelay(&mut self) {
        self.deadline = Some(Instant::now());
    }

    /// Cancels a pending expiry and resets the backoff.
    ///
    /// Stopping an already-stopped timer does nothing; in particular it does
    /// not reset the backoff, so a retransmission path that expires and then
    /// re-arms keeps its doubled timeout.
    pub fn stop(&mut self) {
        if self.deadline.take().is_some() {
            self.timeout = self.config.min_timeout;
        }
    }

    /// True while an expiry is pending.
    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves when the armed deadline passes; pends forever while the
    /// timer is stopped.
    pub async fn fired(&self) {
        match self.deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => pending().await,
        }
    }

    /// Consumes an expiry: disarms the timer, doubles the backoff and
    /// reports whether the timer has run out of road.
    pub fn expire(&mut self) -> bool {
        self.deadline = None;
        let doubled = self.timeout * 2;
        let fail = doubled > self.config.max_timeout;
        self.timeout = doubled.min(self.config.max_timeout);
        fail
    }

    /// The backoff the next [`start`](Self::start) would use.
    #[cfg(test)]
    fn timeout(&self) -> Duration {
        self.timeout
    }
}
