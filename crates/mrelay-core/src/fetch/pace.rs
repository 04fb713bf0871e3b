use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Longest spacing a pacer will honor; larger intervals are clamped.
pub const MAX_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Token-paced spacing between sequential requests to one origin.
///
/// The first call goes out immediately; every later call waits until at least
/// `interval` has passed since the previous slot.
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next: Option<Instant>,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.min(MAX_INTERVAL),
            next: None,
        }
    }

    /// Reserve the next slot and return the wait required before using it.
    pub fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = match self.next {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next = Some(start.checked_add(self.interval).unwrap_or(start));
        start.saturating_duration_since(now)
    }

    pub async fn wait(&mut self) {
        let wait = self.reserve();
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}
