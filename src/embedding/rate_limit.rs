//! Sliding-window rate limiting for embedding requests

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Length of the accounting window
const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Usage {
    id: u64,
    at: Instant,
    tokens: usize,
}

#[derive(Debug, Default)]
struct Window {
    entries: VecDeque<Usage>,
    next_id: u64,
}

impl Window {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.entries.front() {
            if now.duration_since(front.at) >= WINDOW {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    fn tokens(&self) -> usize {
        self.entries.iter().map(|u| u.tokens).sum()
    }
}

/// Capacity granted by [`RateLimiter::reserve`]
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    id: u64,
    tokens: usize,
}

impl Reservation {
    pub fn tokens(&self) -> usize {
        self.tokens
    }
}

/// Requests-per-minute and tokens-per-minute gate shared by every dispatcher
///
/// The window lives behind one async mutex: checking capacity and recording
/// the reservation happen under the same lock, so concurrent callers cannot
/// both claim the last slot.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: usize,
    tokens_per_minute: usize,
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(requests_per_minute: usize, tokens_per_minute: usize) -> Self {
        Self {
            requests_per_minute: requests_per_minute.max(1),
            tokens_per_minute: tokens_per_minute.max(1),
            window: Mutex::new(Window::default()),
        }
    }

    /// Wait until one request carrying `tokens` fits in the window, then
    /// claim it.
    ///
    /// A request larger than the whole token budget is admitted once the
    /// window is empty.
    pub async fn reserve(&self, tokens: usize) -> Reservation {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                window.prune(now);

                let requests_fit = window.entries.len() < self.requests_per_minute;
                let tokens_fit = window.entries.is_empty()
                    || window.tokens() + tokens <= self.tokens_per_minute;

                if requests_fit && tokens_fit {
                    let id = window.next_id;
                    window.next_id += 1;
                    window.entries.push_back(Usage {
                        id,
                        at: now,
                        tokens,
                    });
                    return Reservation { id, tokens };
                }

                window
                    .entries
                    .front()
                    .map(|oldest| (oldest.at + WINDOW).saturating_duration_since(now))
                    .unwrap_or_default()
            };

            debug!("Rate limit reached, waiting {:?} for capacity", wait);
            tokio::time::sleep(wait).await;
        }
    }

    /// Replace a reservation's token estimate with the amount actually used
    pub async fn record_usage(&self, reservation: &Reservation, actual_tokens: usize) {
        let mut window = self.window.lock().await;
        if let Some(entry) = window.entries.iter_mut().find(|u| u.id == reservation.id) {
            entry.tokens = actual_tokens;
        }
    }

    /// Requests and tokens currently counted in the window
    pub async fn in_flight(&self) -> (usize, usize) {
        let mut window = self.window.lock().await;
        window.prune(Instant::now());
        (window.entries.len(), window.tokens())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_request_limit_blocks_until_window_slides() {
        let limiter = RateLimiter::new(2, 1_000_000);
        let start = Instant::now();

        limiter.reserve(1).await;
        limiter.reserve(1).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.reserve(1).await;
        assert!(start.elapsed() >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_limit_blocks() {
        let limiter = RateLimiter::new(100, 100);
        let start = Instant::now();

        limiter.reserve(80).await;
        limiter.reserve(20).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        limiter.reserve(1).await;
        assert!(start.elapsed() >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_admitted_on_empty_window() {
        let limiter = RateLimiter::new(10, 50);
        limiter.reserve(500).await;
        assert_eq!(limiter.in_flight().await, (1, 500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_usage_frees_tokens() {
        let limiter = RateLimiter::new(10, 100);
        let start = Instant::now();

        let reservation = limiter.reserve(100).await;
        limiter.record_usage(&reservation, 0).await;
        limiter.reserve(100).await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.in_flight().await, (2, 100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reservations_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::new(3, 1_000_000));
        let start = Instant::now();

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.reserve(1).await;
                    Instant::now()
                })
            })
            .collect();

        let mut admitted = Vec::new();
        for handle in handles {
            admitted.push(handle.await.unwrap());
        }

        let immediate = admitted.iter().filter(|t| **t == start).count();
        assert_eq!(immediate, 3);
        assert!(admitted.iter().all(|t| *t == start || *t >= start + WINDOW));
    }
}
