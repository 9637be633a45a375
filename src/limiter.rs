//! Process-wide cap on upstream calls per time window.
//!
//! Callers over budget wait for the oldest call to leave the window instead
//! of being rejected.

use std::collections::VecDeque;
use std::time::Duration;

use log::debug;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    period: Duration,
    calls: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_calls: usize, period: Duration) -> Self {
        Self {
            max_calls,
            period,
            calls: Mutex::new(VecDeque::with_capacity(max_calls)),
        }
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Block until a call slot is free, then claim it
    pub async fn acquire(&self) {
        if self.max_calls == 0 || self.period.is_zero() {
            return;
        }

        loop {
            let wait = {
                let mut calls = self.calls.lock().await;
                let now = Instant::now();
                while calls
                    .front()
                    .is_some_and(|&t| now.duration_since(t) >= self.period)
                {
                    calls.pop_front();
                }

                if calls.len() < self.max_calls {
                    calls.push_back(now);
                    return;
                }

                match calls.front() {
                    Some(&oldest) => (oldest + self.period).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            debug!("Call budget of {} per {:?} spent, waiting {wait:?}", self.max_calls, self.period);
            sleep(wait).await;
        }
    }
}
