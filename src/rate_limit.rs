use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window limiter on request starts per minute.
///
/// Callers await [`RateLimiter::acquire`] before every request. A limit of
/// zero disables limiting.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: usize,
    starts: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests_per_minute: requests_per_minute as usize,
            starts: Mutex::new(VecDeque::new()),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute as u32
    }

    /// Wait until a request may start, then record it.
    pub async fn acquire(&self) {
        if self.requests_per_minute == 0 {
            return;
        }

        loop {
            let wait = {
                let mut starts = self.starts.lock();
                let now = Instant::now();
                while starts.front().is_some_and(|t| now.duration_since(*t) >= WINDOW) {
                    starts.pop_front();
                }

                if starts.len() < self.requests_per_minute {
                    starts.push_back(now);
                    return;
                }

                // Full window: the oldest start frees the next slot
                match starts.front() {
                    Some(oldest) => WINDOW.saturating_sub(now.duration_since(*oldest)),
                    None => Duration::ZERO,
                }
            };

            debug!("Rate limit reached, waiting {:?}", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Starts recorded in the current window
    pub fn in_window(&self) -> usize {
        let now = Instant::now();
        self.starts
            .lock()
            .iter()
            .filter(|t| now.duration_since(**t) < WINDOW)
            .count()
    }
}
