// src/services/rate_limit.rs

//! Dual rate governance for upstream calls.
//!
//! Every call first honours a minimum spacing since the previous call, then a
//! cap on calls per rolling 60-second window. Over-budget callers are
//! suspended, never rejected. The budget sits behind an async mutex held
//! across the waits, so concurrent callers queue up instead of both seeing
//! spare budget.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};

/// Length of the rolling window.
pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct RateBudget {
    last_request: Option<Instant>,
    window_start: Option<Instant>,
    requests_in_window: u32,
}

/// Shared limiter owned by the upstream client.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    max_per_window: u32,
    window: Duration,
    budget: Mutex<RateBudget>,
}

impl RateLimiter {
    pub fn new(interval: Duration, max_per_window: u32) -> Self {
        Self::with_window(interval, max_per_window, WINDOW)
    }

    pub fn with_window(interval: Duration, max_per_window: u32, window: Duration) -> Self {
        Self {
            interval,
            max_per_window: max_per_window.max(1),
            window,
            budget: Mutex::new(RateBudget::default()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until one more call fits the budget, then spend it.
    ///
    /// Returns how long the caller was suspended.
    pub async fn acquire(&self) -> Duration {
        let mut budget = self.budget.lock().await;
        let started = Instant::now();

        if let Some(last) = budget.last_request {
            let since = last.elapsed();
            if since < self.interval {
                sleep(self.interval - since).await;
            }
        }

        let now = Instant::now();
        match budget.window_start {
            Some(start) if now.duration_since(start) < self.window => {
                if budget.requests_in_window >= self.max_per_window {
                    let remaining = self.window - now.duration_since(start);
                    log::debug!(
                        "Rate window exhausted ({} calls), waiting {:?}",
                        budget.requests_in_window,
                        remaining
                    );
                    sleep(remaining).await;
                    budget.window_start = Some(Instant::now());
                    budget.requests_in_window = 0;
                }
            }
            _ => {
                budget.window_start = Some(now);
                budget.requests_in_window = 0;
            }
        }

        budget.requests_in_window += 1;
        budget.last_request = Some(Instant::now());
        started.elapsed()
    }
}
